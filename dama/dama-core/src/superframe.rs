// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Admission control and grant generation across the frames of a superframe

use crate::{
    error::Kind,
    event::{self, Meta},
    frame::{
        self, AllocationFailure, AllocationRequest, CcLevel, FrameAllocator, Tbtp, UtAllocInfoMap,
    },
    time::Timestamp,
    Result,
};
use tracing::{debug, trace};

mod config;

pub use config::Config;

/// Where and how a terminal was admitted
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Allocation {
    pub frame_id: u8,
    pub waveform_id: u32,
    pub cc_level: CcLevel,
}

#[derive(Debug)]
pub struct SuperframeAllocator<F: frame::Allocator = FrameAllocator> {
    config: Config,
    frames: Vec<F>,
    min_carrier_payload_bytes: u32,
    most_robust_slot_payload_bytes: u32,
    minimum_rate_bytes_left: u32,
}

impl<F: frame::Allocator> SuperframeAllocator<F> {
    pub fn new(config: Config, frames: Vec<F>) -> Result<Self> {
        ensure!(!frames.is_empty(), Err(Kind::NoFrames.err()));

        let min_carrier_payload_bytes = frames
            .iter()
            .map(F::min_carrier_payload_bytes)
            .min()
            .unwrap_or_default();
        let most_robust_slot_payload_bytes = frames
            .iter()
            .map(F::most_robust_slot_payload_bytes)
            .min()
            .unwrap_or_default();

        Ok(Self {
            config,
            frames,
            min_carrier_payload_bytes,
            most_robust_slot_payload_bytes,
            minimum_rate_bytes_left: min_carrier_payload_bytes,
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn frames(&self) -> &[F] {
        &self.frames
    }

    /// Bytes still available for minimum rate guarantees
    #[inline]
    pub fn minimum_rate_bytes_left(&self) -> u32 {
        self.minimum_rate_bytes_left
    }

    #[inline]
    pub fn min_carrier_payload_bytes(&self) -> u32 {
        self.min_carrier_payload_bytes
    }

    #[inline]
    pub fn most_robust_slot_payload_bytes(&self) -> u32 {
        self.most_robust_slot_payload_bytes
    }

    /// Removes every allocation from every frame
    pub fn remove_allocations(&mut self) {
        for frame in &mut self.frames {
            frame.reset();
        }
    }

    /// Admits the requests of one allocation cycle and distributes the
    /// symbols of every frame among the admitted terminals
    ///
    /// Returns the outcome of every request, in request order.
    pub fn pre_allocate_symbols<Sub: event::Subscriber>(
        &mut self,
        requests: &[AllocationRequest],
        now: Timestamp,
        subscriber: &mut Sub,
    ) -> Vec<Result<Allocation, AllocationFailure>> {
        let meta = Meta::new(now);
        self.remove_allocations();

        let outcomes = requests
            .iter()
            .map(|request| {
                let outcome = self.allocate_to_frame(request);
                match outcome {
                    Ok(allocation) => {
                        subscriber.on_terminal_allocated(
                            &meta,
                            &event::TerminalAllocated {
                                terminal: request.terminal,
                                frame_id: allocation.frame_id,
                                waveform_id: allocation.waveform_id,
                                cc_level: allocation.cc_level,
                            },
                        );
                    }
                    Err(reason) => {
                        subscriber.on_terminal_unallocated(
                            &meta,
                            &event::TerminalUnallocated {
                                terminal: request.terminal,
                                reason,
                            },
                        );
                    }
                }
                outcome
            })
            .collect();

        for frame in &mut self.frames {
            frame.pre_allocate_symbols(self.config.target_load, self.config.fca_enabled);
        }

        outcomes
    }

    /// Admits `request` to the least loaded frame supporting its channel
    /// quality, at the richest congestion control level any frame accepts
    ///
    /// On failure no frame is modified.
    pub fn allocate_to_frame(
        &mut self,
        request: &AllocationRequest,
    ) -> Result<Allocation, AllocationFailure> {
        let candidates: Vec<(usize, u32)> = self
            .frames
            .iter()
            .enumerate()
            .filter_map(|(idx, frame)| frame.best_waveform(request.cno).map(|w| (idx, w)))
            .collect();

        if candidates.is_empty() {
            debug!(terminal = %request.terminal, cno = request.cno, "no frame supports the terminal");
            return Err(AllocationFailure::UnsupportedChannelQuality);
        }

        for level in CcLevel::DESCENDING {
            if let Some((idx, waveform_id)) = self.allocate_based_on_cc(level, request, &candidates) {
                let frame_id = self.frames[idx].id();
                debug!(terminal = %request.terminal, frame_id, waveform_id, %level, "terminal allocated");
                return Ok(Allocation {
                    frame_id,
                    waveform_id,
                    cc_level: level,
                });
            }
        }

        debug!(terminal = %request.terminal, "no congestion control level admits the terminal");
        Err(AllocationFailure::Congested)
    }

    /// Offers `request` at `level` to the candidate with the lowest load
    ///
    /// Ties go to the candidate listed first.
    fn allocate_based_on_cc(
        &mut self,
        level: CcLevel,
        request: &AllocationRequest,
        candidates: &[(usize, u32)],
    ) -> Option<(usize, u32)> {
        let mut selected = *candidates.first()?;
        let mut lowest = self.frames[selected.0].cc_load(level);

        for candidate in &candidates[1..] {
            let load = self.frames[candidate.0].cc_load(level);
            if load < lowest {
                selected = *candidate;
                lowest = load;
            }
        }

        trace!(frame = self.frames[selected.0].id(), %level, load = lowest, "frame selected");

        let (idx, waveform_id) = selected;
        self.frames[idx]
            .allocate(level, request, waveform_id)
            .then_some(selected)
    }

    /// Generates the time slots of all frames into `tbtps`
    ///
    /// `tbtps` must contain the message to start filling; further messages are
    /// appended whenever one would exceed `max_size_bytes`.
    pub fn generate_time_slots<Sub: event::Subscriber>(
        &mut self,
        tbtps: &mut Vec<Tbtp>,
        max_size_bytes: usize,
        ut_alloc: &mut UtAllocInfoMap,
        now: Timestamp,
        subscriber: &mut Sub,
    ) -> Result {
        ensure!(!tbtps.is_empty(), Err(Kind::EmptyTbtpContainer.err()));

        for frame in &mut self.frames {
            frame.generate_time_slots(
                tbtps,
                max_size_bytes,
                ut_alloc,
                self.config.rc_based_allocation_enabled,
                now,
                subscriber,
            );
        }

        Ok(())
    }

    /// Reserves `bytes` of the minimum rate budget for a terminal
    ///
    /// When control slots are enabled, the terminal's control slot must fit in
    /// the same carrier, so its payload is included in the check.
    pub fn reserve_minimum_rate(&mut self, bytes: u32, control_slots_enabled: bool) -> Result {
        let checked = self.checked_minimum_rate(bytes, control_slots_enabled)?;

        ensure!(
            checked <= self.minimum_rate_bytes_left,
            Err(Kind::MinimumRateExceedsRemaining {
                requested: checked,
                remaining: self.minimum_rate_bytes_left,
            }
            .err())
        );

        self.minimum_rate_bytes_left -= bytes;
        Ok(())
    }

    /// Returns `bytes` previously reserved with the same arguments
    pub fn release_minimum_rate(&mut self, bytes: u32, control_slots_enabled: bool) -> Result {
        self.checked_minimum_rate(bytes, control_slots_enabled)?;
        self.minimum_rate_bytes_left = self.minimum_rate_bytes_left.saturating_add(bytes);
        Ok(())
    }

    #[track_caller]
    fn checked_minimum_rate(&self, bytes: u32, control_slots_enabled: bool) -> Result<u32> {
        let mut checked = bytes;
        if control_slots_enabled {
            checked = checked.saturating_add(self.most_robust_slot_payload_bytes);
        }

        ensure!(
            checked <= self.min_carrier_payload_bytes,
            Err(Kind::MinimumRateExceedsCarrier {
                requested: checked,
                carrier: self.min_carrier_payload_bytes,
            }
            .err())
        );

        Ok(checked)
    }
}
