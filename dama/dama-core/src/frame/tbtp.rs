// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{address::Address, service::RcIndex};
use std::collections::BTreeMap;

/// A single slot granted to a terminal
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeSlot {
    pub frame_id: u8,
    pub carrier_id: u32,
    pub start_symbol: u32,
    pub waveform_id: u32,
    /// Request class the slot is dedicated to
    pub rc_index: RcIndex,
    /// Whether the slot carries control traffic only
    pub control: bool,
}

/// Terminal burst time plan: the grant message broadcast each superframe
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tbtp {
    superframe_counter: u32,
    assignments: Vec<(Address, TimeSlot)>,
}

impl Tbtp {
    /// Fixed part of the message
    pub const HEADER_BYTES: usize = 6;
    /// Size of one slot assignment entry
    pub const ASSIGNMENT_BYTES: usize = 4;

    pub fn new(superframe_counter: u32) -> Self {
        Self {
            superframe_counter,
            assignments: Vec::new(),
        }
    }

    #[inline]
    pub fn superframe_counter(&self) -> u32 {
        self.superframe_counter
    }

    #[inline]
    pub fn assignments(&self) -> &[(Address, TimeSlot)] {
        &self.assignments
    }

    #[inline]
    pub fn size_in_bytes(&self) -> usize {
        Self::HEADER_BYTES + self.assignments.len() * Self::ASSIGNMENT_BYTES
    }

    /// Iterates over the slots granted to `terminal`
    pub fn slots_for(&self, terminal: Address) -> impl Iterator<Item = &TimeSlot> {
        self.assignments
            .iter()
            .filter(move |(address, _)| *address == terminal)
            .map(|(_, slot)| slot)
    }
}

/// Appends `slot` to the last message, starting a new one when the last would
/// exceed `max_size_bytes`
pub(crate) fn push_slot(
    tbtps: &mut Vec<Tbtp>,
    max_size_bytes: usize,
    terminal: Address,
    slot: TimeSlot,
) {
    let counter = tbtps.last().map_or(0, Tbtp::superframe_counter);
    let fits = tbtps
        .last()
        .is_some_and(|tbtp| tbtp.size_in_bytes() + Tbtp::ASSIGNMENT_BYTES <= max_size_bytes);

    if !fits {
        tbtps.push(Tbtp::new(counter));
    }

    if let Some(tbtp) = tbtps.last_mut() {
        tbtp.assignments.push((terminal, slot));
    }
}

/// Bytes granted to a terminal this superframe
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UtAllocInfo {
    /// Granted bytes indexed by request class
    pub bytes_per_rc: Vec<u32>,
    pub control_slot: bool,
}

impl UtAllocInfo {
    #[inline]
    pub fn total_bytes(&self) -> u32 {
        self.bytes_per_rc.iter().sum()
    }

    pub(crate) fn add(&mut self, rc: RcIndex, bytes: u32) {
        let idx = rc as usize;
        if self.bytes_per_rc.len() <= idx {
            self.bytes_per_rc.resize(idx + 1, 0);
        }
        self.bytes_per_rc[idx] = self.bytes_per_rc[idx].saturating_add(bytes);
    }
}

pub type UtAllocInfoMap = BTreeMap<Address, UtAllocInfo>;
