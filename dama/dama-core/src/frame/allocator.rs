// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::{
    tbtp::push_slot, AllocationRequest, Allocator, CcLevel, Config, RcDemand, Tbtp, TimeSlot,
    UtAllocInfoMap, Waveform,
};
use crate::{
    address::Address,
    event::{self, Meta},
    service::RcIndex,
    time::Timestamp,
};
use core::ops::AddAssign;
use tracing::{debug, trace};

/// Demand of one request class converted to symbols
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Symbols {
    cra: f64,
    min_rbdc: f64,
    rbdc: f64,
    vbdc: f64,
}

impl Symbols {
    fn new(waveform: &Waveform, demand: &RcDemand) -> Self {
        Self {
            cra: waveform.symbols(demand.cra_bytes),
            min_rbdc: waveform.symbols(demand.min_rbdc_bytes),
            rbdc: waveform.symbols(demand.rbdc_bytes.max(demand.min_rbdc_bytes)),
            vbdc: waveform.symbols(demand.vbdc_bytes),
        }
    }

    /// RBDC demand above the guaranteed minimum
    #[inline]
    fn rbdc_extra(&self) -> f64 {
        (self.rbdc - self.min_rbdc).max(0.0)
    }

    /// Symbols needed to serve the demand included at `level`
    fn at(&self, level: CcLevel) -> f64 {
        match level {
            CcLevel::Cra => self.cra,
            CcLevel::CraMinRbdc => self.cra + self.min_rbdc,
            CcLevel::CraRbdc => self.cra + self.rbdc,
            CcLevel::CraRbdcVbdc => self.cra + self.rbdc + self.vbdc,
        }
    }

    /// Drops the demand not included at `level`
    fn restrict(self, level: CcLevel) -> Self {
        let mut symbols = self;
        if level < CcLevel::CraRbdcVbdc {
            symbols.vbdc = 0.0;
        }
        if level < CcLevel::CraRbdc {
            symbols.rbdc = symbols.min_rbdc;
        }
        if level < CcLevel::CraMinRbdc {
            symbols.min_rbdc = 0.0;
            symbols.rbdc = 0.0;
        }
        symbols
    }
}

impl AddAssign for Symbols {
    fn add_assign(&mut self, rhs: Self) {
        self.cra += rhs.cra;
        self.min_rbdc += rhs.min_rbdc;
        self.rbdc += rhs.rbdc;
        self.vbdc += rhs.vbdc;
    }
}

#[derive(Clone, Debug)]
struct Terminal {
    address: Address,
    waveform: Waveform,
    level: CcLevel,
    /// Symbols of the control slot, zero when no control slot is needed
    control_symbols: f64,
    /// Admitted demand per request class
    demand: Vec<Symbols>,
    /// Symbols granted per request class by the last pre-allocation
    granted: Vec<f64>,
    /// Free capacity granted on top of the demand
    free_symbols: f64,
}

impl Terminal {
    fn total(&self) -> Symbols {
        let mut total = Symbols {
            cra: self.control_symbols,
            ..Default::default()
        };
        for symbols in &self.demand {
            total += *symbols;
        }
        total
    }

    fn granted_symbols(&self) -> f64 {
        self.control_symbols + self.granted.iter().sum::<f64>() + self.free_symbols
    }
}

/// Reference frame allocator with per category symbol accounting
#[derive(Clone, Debug)]
pub struct FrameAllocator {
    config: Config,
    most_robust: Waveform,
    /// Admitted demand of all terminals
    totals: Symbols,
    terminals: Vec<Terminal>,
}

impl FrameAllocator {
    pub fn new(config: Config) -> Self {
        let most_robust = *config.most_robust_waveform();
        Self {
            config,
            most_robust,
            totals: Symbols::default(),
            terminals: Vec::new(),
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of terminals admitted since the last reset
    #[inline]
    pub fn terminal_count(&self) -> usize {
        self.terminals.len()
    }

    /// Level at which `terminal` was admitted, if it was
    pub fn admitted_level(&self, terminal: Address) -> Option<CcLevel> {
        self.terminals
            .iter()
            .find(|t| t.address == terminal)
            .map(|t| t.level)
    }

    /// Symbols granted to `terminal` by the last pre-allocation
    pub fn granted_symbols(&self, terminal: Address) -> Option<f64> {
        self.terminals
            .iter()
            .find(|t| t.address == terminal)
            .map(Terminal::granted_symbols)
    }

    #[inline]
    fn capacity(&self) -> f64 {
        self.config.capacity_symbols()
    }

    fn slots_per_carrier(&self, waveform: &Waveform) -> u32 {
        self.config.symbols_per_carrier / waveform.burst_length_symbols
    }
}

impl Allocator for FrameAllocator {
    #[inline]
    fn id(&self) -> u8 {
        self.config.id
    }

    fn reset(&mut self) {
        self.totals = Symbols::default();
        self.terminals.clear();
    }

    fn best_waveform(&self, cno: f64) -> Option<u32> {
        self.config.best_waveform(cno).map(|w| w.id)
    }

    fn cc_load(&self, level: CcLevel) -> f64 {
        self.totals.at(level) / self.capacity()
    }

    fn allocate(&mut self, level: CcLevel, request: &AllocationRequest, waveform_id: u32) -> bool {
        let Some(waveform) = self.config.waveform(waveform_id).copied() else {
            return false;
        };

        let control_symbols = if request.control_slot {
            self.most_robust.burst_length_symbols as f64
        } else {
            0.0
        };

        let demand: Vec<Symbols> = request
            .demand
            .iter()
            .map(|demand| Symbols::new(&waveform, demand).restrict(level))
            .collect();

        let mut requested = Symbols {
            cra: control_symbols,
            ..Default::default()
        };
        for symbols in &demand {
            requested += *symbols;
        }

        // a terminal transmits on a single carrier at a time
        ensure!(
            requested.at(level) <= self.config.symbols_per_carrier as f64,
            false
        );
        ensure!(
            self.totals.at(level) + requested.at(level) <= self.capacity(),
            false
        );

        trace!(
            frame = self.config.id,
            terminal = %request.terminal,
            %level,
            symbols = requested.at(level),
            "terminal admitted"
        );

        self.totals += requested;
        self.terminals.push(Terminal {
            address: request.terminal,
            waveform,
            level,
            control_symbols,
            granted: vec![0.0; demand.len()],
            demand,
            free_symbols: 0.0,
        });

        true
    }

    fn pre_allocate_symbols(&mut self, target_load: f64, fca_enabled: bool) {
        let mut symbols_left = (target_load * self.capacity()
            - self.totals.cra
            - self.totals.min_rbdc)
            .max(0.0);

        let rbdc_extra: f64 = self
            .terminals
            .iter()
            .flat_map(|t| t.demand.iter())
            .map(Symbols::rbdc_extra)
            .sum();
        let rbdc_share = share(rbdc_extra, symbols_left);
        symbols_left = (symbols_left - rbdc_extra * rbdc_share).max(0.0);

        let vbdc_share = share(self.totals.vbdc, symbols_left);
        symbols_left = (symbols_left - self.totals.vbdc * vbdc_share).max(0.0);

        let free_per_terminal = if fca_enabled && !self.terminals.is_empty() {
            symbols_left / self.terminals.len() as f64
        } else {
            0.0
        };

        let symbols_per_carrier = self.config.symbols_per_carrier as f64;

        for terminal in &mut self.terminals {
            for (granted, demand) in terminal.granted.iter_mut().zip(&terminal.demand) {
                *granted = demand.cra
                    + demand.min_rbdc
                    + demand.rbdc_extra() * rbdc_share
                    + demand.vbdc * vbdc_share;
            }

            terminal.free_symbols = 0.0;
            let used = terminal.granted_symbols();
            terminal.free_symbols = free_per_terminal.min((symbols_per_carrier - used).max(0.0));
        }

        debug!(
            frame = self.config.id,
            rbdc_share,
            vbdc_share,
            free_per_terminal,
            "symbols pre-allocated"
        );
    }

    fn generate_time_slots<Sub: event::Subscriber>(
        &mut self,
        tbtps: &mut Vec<Tbtp>,
        max_size_bytes: usize,
        ut_alloc: &mut UtAllocInfoMap,
        rc_based: bool,
        now: Timestamp,
        subscriber: &mut Sub,
    ) {
        let meta = Meta::new(now);
        let frame_id = self.config.id;
        let symbols_per_carrier = self.config.symbols_per_carrier;

        let mut carrier_id = 0;
        let mut offset = 0;
        let mut used_symbols = 0u64;
        let mut terminal_count = 0;

        for terminal in &self.terminals {
            let waveform = terminal.waveform;
            let burst = waveform.burst_length_symbols;

            let data_symbols = terminal.granted_symbols() - terminal.control_symbols;
            let max_data_slots = (symbols_per_carrier - terminal.control_symbols as u32) / burst;
            let data_slots =
                ((data_symbols / burst as f64).ceil().max(0.0) as u32).min(max_data_slots);
            let control_burst = terminal.control_symbols as u32;
            let needed = control_burst + data_slots * burst;

            if needed == 0 {
                continue;
            }

            if offset + needed > symbols_per_carrier {
                carrier_id += 1;
                offset = 0;
            }

            if carrier_id >= self.config.carrier_count {
                trace!(frame = frame_id, terminal = %terminal.address, "frame full");
                continue;
            }

            let info = ut_alloc.entry(terminal.address).or_default();

            if control_burst > 0 {
                let slot = TimeSlot {
                    frame_id,
                    carrier_id,
                    start_symbol: offset,
                    waveform_id: self.most_robust.id,
                    rc_index: 0,
                    control: true,
                };
                push_slot(tbtps, max_size_bytes, terminal.address, slot);
                subscriber.on_waveform_allocated(
                    &meta,
                    &event::WaveformAllocated {
                        waveform_id: self.most_robust.id,
                    },
                );
                info.control_slot = true;
                info.add(0, self.most_robust.payload_bytes);
                offset += control_burst;
            }

            // bytes still owed to each request class, in slot order
            let mut owed: Vec<f64> = terminal
                .granted
                .iter()
                .map(|symbols| waveform.bytes(*symbols))
                .collect();

            for _ in 0..data_slots {
                let rc = owed
                    .iter()
                    .position(|bytes| *bytes > 0.0)
                    .unwrap_or(owed.len().saturating_sub(1));
                if let Some(bytes) = owed.get_mut(rc) {
                    *bytes -= waveform.payload_bytes as f64;
                }
                let rc = rc as RcIndex;

                let slot = TimeSlot {
                    frame_id,
                    carrier_id,
                    start_symbol: offset,
                    waveform_id: waveform.id,
                    rc_index: if rc_based { rc } else { 0 },
                    control: false,
                };
                push_slot(tbtps, max_size_bytes, terminal.address, slot);
                subscriber.on_waveform_allocated(
                    &meta,
                    &event::WaveformAllocated {
                        waveform_id: waveform.id,
                    },
                );
                info.add(rc, waveform.payload_bytes);
                offset += burst;
            }

            used_symbols += needed as u64;
            terminal_count += 1;
        }

        subscriber.on_terminal_load(
            &meta,
            &event::TerminalLoad {
                frame_id,
                terminal_count,
            },
        );
        subscriber.on_frame_load(
            &meta,
            &event::FrameLoad {
                frame_id,
                load: used_symbols as f64 / self.capacity(),
            },
        );
    }

    fn min_carrier_payload_bytes(&self) -> u32 {
        self.slots_per_carrier(&self.most_robust) * self.most_robust.payload_bytes
    }

    #[inline]
    fn most_robust_slot_payload_bytes(&self) -> u32 {
        self.most_robust.payload_bytes
    }
}

/// Fraction of `demand` that fits in `available`
#[inline]
fn share(demand: f64, available: f64) -> f64 {
    if demand <= available {
        1.0
    } else {
        available / demand
    }
}
