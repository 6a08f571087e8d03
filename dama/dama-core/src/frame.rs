// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Capacity of a single physical frame of the return link
//!
//! A frame consists of a number of carriers sharing a set of waveforms. The
//! [`Allocator`] trait is the seam the superframe allocator composes over;
//! [`FrameAllocator`] is the reference implementation.

use crate::{
    address::Address,
    event,
    service::RcIndex,
    time::Timestamp,
};
use core::fmt;

mod allocator;
mod config;
mod tbtp;

pub use allocator::FrameAllocator;
pub use config::{Config, Waveform};
pub use tbtp::{Tbtp, TimeSlot, UtAllocInfo, UtAllocInfoMap};

/// Congestion control level used while admitting terminals
///
/// Levels are ordered from the leanest to the richest, so `Ord` compares the
/// amount of demand a level includes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CcLevel {
    /// Constant rate assignment only
    Cra,
    /// CRA and the minimum guaranteed RBDC
    CraMinRbdc,
    /// CRA and the full RBDC request
    CraRbdc,
    /// CRA, RBDC and VBDC
    CraRbdcVbdc,
}

impl CcLevel {
    /// All levels in the order they are tried during admission
    pub const DESCENDING: [Self; 4] = [
        Self::CraRbdcVbdc,
        Self::CraRbdc,
        Self::CraMinRbdc,
        Self::Cra,
    ];
}

impl fmt::Display for CcLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cra => "CRA",
            Self::CraMinRbdc => "CRA+minRBDC",
            Self::CraRbdc => "CRA+RBDC",
            Self::CraRbdcVbdc => "CRA+RBDC+VBDC",
        };
        f.write_str(name)
    }
}

/// Reason a terminal received no grant this allocation cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AllocationFailure {
    #[error("no frame supports the channel quality of the terminal")]
    UnsupportedChannelQuality,
    #[error("no congestion control level admits the request")]
    Congested,
}

/// Demand of one request class in bytes per superframe
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RcDemand {
    pub cra_bytes: u32,
    /// Part of the RBDC demand that is always guaranteed
    pub min_rbdc_bytes: u32,
    /// Full RBDC demand, including the guaranteed part
    pub rbdc_bytes: u32,
    pub vbdc_bytes: u32,
}

/// A terminal's request for one allocation cycle
#[derive(Clone, Debug, PartialEq)]
pub struct AllocationRequest {
    pub terminal: Address,
    /// C/N0 estimate of the terminal's return link, in dBHz
    pub cno: f64,
    /// Whether a control slot must be granted regardless of demand
    pub control_slot: bool,
    /// Demand indexed by request class
    pub demand: Vec<RcDemand>,
}

impl AllocationRequest {
    pub fn new(terminal: Address, cno: f64) -> Self {
        Self {
            terminal,
            cno,
            control_slot: false,
            demand: Vec::new(),
        }
    }

    pub fn with_control_slot(mut self, enabled: bool) -> Self {
        self.control_slot = enabled;
        self
    }

    pub fn with_demand(mut self, rc: RcIndex, demand: RcDemand) -> Self {
        let idx = rc as usize;
        if self.demand.len() <= idx {
            self.demand.resize(idx + 1, RcDemand::default());
        }
        self.demand[idx] = demand;
        self
    }
}

/// Admission control and slot generation for one frame
pub trait Allocator {
    fn id(&self) -> u8;

    /// Removes every admitted terminal
    fn reset(&mut self);

    /// Returns the most efficient waveform supported at `cno`, if any
    fn best_waveform(&self, cno: f64) -> Option<u32>;

    /// Share of the frame's symbols used by the admitted demand at `level`
    fn cc_load(&self, level: CcLevel) -> f64;

    /// Admits `request` at `level` using `waveform_id`
    ///
    /// Returns false without modifying any state if the frame cannot carry the
    /// request.
    fn allocate(&mut self, level: CcLevel, request: &AllocationRequest, waveform_id: u32) -> bool;

    /// Distributes the symbols of the frame among the admitted terminals
    fn pre_allocate_symbols(&mut self, target_load: f64, fca_enabled: bool);

    /// Appends the time slots of every admitted terminal to `tbtps`
    #[allow(clippy::too_many_arguments)]
    fn generate_time_slots<Sub: event::Subscriber>(
        &mut self,
        tbtps: &mut Vec<Tbtp>,
        max_size_bytes: usize,
        ut_alloc: &mut UtAllocInfoMap,
        rc_based: bool,
        now: Timestamp,
        subscriber: &mut Sub,
    );

    /// Payload of one carrier filled with the most robust waveform
    fn min_carrier_payload_bytes(&self) -> u32;

    /// Payload of a single slot using the most robust waveform
    fn most_robust_slot_payload_bytes(&self) -> u32;
}
