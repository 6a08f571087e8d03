// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::error::ValidationError;

/// A modulation and coding scheme usable in a time slot
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Waveform {
    pub id: u32,
    /// Bytes carried by one slot
    pub payload_bytes: u32,
    /// Symbols occupied by one slot
    pub burst_length_symbols: u32,
    /// Minimum C/N0 in dBHz needed to decode the waveform
    pub cno_threshold: f64,
}

impl Waveform {
    /// Number of symbols needed to carry `bytes`
    #[inline]
    pub fn symbols(&self, bytes: u32) -> f64 {
        bytes as f64 * self.burst_length_symbols as f64 / self.payload_bytes as f64
    }

    /// Number of bytes carried by `symbols`
    #[inline]
    pub fn bytes(&self, symbols: f64) -> f64 {
        symbols * self.payload_bytes as f64 / self.burst_length_symbols as f64
    }
}

/// Layout of a frame
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub(crate) id: u8,
    pub(crate) carrier_count: u32,
    pub(crate) symbols_per_carrier: u32,
    pub(crate) waveforms: Vec<Waveform>,
}

impl Config {
    pub fn new(
        id: u8,
        carrier_count: u32,
        symbols_per_carrier: u32,
        waveforms: Vec<Waveform>,
    ) -> Result<Self, ValidationError> {
        ensure!(
            carrier_count > 0,
            Err(ValidationError("a frame needs at least one carrier"))
        );
        ensure!(
            !waveforms.is_empty(),
            Err(ValidationError("a frame needs at least one waveform"))
        );
        for waveform in &waveforms {
            ensure!(
                waveform.payload_bytes > 0,
                Err(ValidationError("waveform payload must be non-zero"))
            );
            ensure!(
                waveform.burst_length_symbols > 0
                    && waveform.burst_length_symbols <= symbols_per_carrier,
                Err(ValidationError("waveform burst must fit in a carrier"))
            );
            ensure!(
                waveform.cno_threshold.is_finite(),
                Err(ValidationError("waveform C/N0 threshold must be finite"))
            );
        }

        Ok(Self {
            id,
            carrier_count,
            symbols_per_carrier,
            waveforms,
        })
    }

    #[inline]
    pub fn id(&self) -> u8 {
        self.id
    }

    #[inline]
    pub fn carrier_count(&self) -> u32 {
        self.carrier_count
    }

    #[inline]
    pub fn symbols_per_carrier(&self) -> u32 {
        self.symbols_per_carrier
    }

    #[inline]
    pub fn waveforms(&self) -> &[Waveform] {
        &self.waveforms
    }

    #[inline]
    pub fn capacity_symbols(&self) -> f64 {
        self.carrier_count as f64 * self.symbols_per_carrier as f64
    }

    #[inline]
    pub fn waveform(&self, id: u32) -> Option<&Waveform> {
        self.waveforms.iter().find(|w| w.id == id)
    }

    /// The waveform with the lowest C/N0 threshold
    pub fn most_robust_waveform(&self) -> &Waveform {
        // the constructor rejects frames without waveforms
        self.waveforms[1..]
            .iter()
            .fold(&self.waveforms[0], |best, w| {
                if w.cno_threshold < best.cno_threshold {
                    w
                } else {
                    best
                }
            })
    }

    /// The waveform carrying the most bytes per symbol that `cno` supports
    pub fn best_waveform(&self, cno: f64) -> Option<&Waveform> {
        self.waveforms
            .iter()
            .filter(|w| w.cno_threshold <= cno)
            .fold(None, |best: Option<&Waveform>, w| match best {
                Some(best) if efficiency(best) >= efficiency(w) => Some(best),
                _ => Some(w),
            })
    }
}

#[inline]
fn efficiency(waveform: &Waveform) -> f64 {
    waveform.payload_bytes as f64 / waveform.burst_length_symbols as f64
}
