// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use dama_core::{
    control::Category,
    event::{self, Meta},
};
use serde::Serialize;

/// Outcome of one simulated run
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Report {
    pub seed: u64,
    pub requests: Requests,
    pub allocation: Allocation,
    pub arq: Arq,
    pub offered_packets: u64,
    pub offered_bytes: u64,
}

impl Report {
    /// Share of the offered packets delivered to the gateway
    pub fn delivery_ratio(&self) -> f64 {
        if self.offered_packets == 0 {
            return 1.0;
        }
        self.arq.delivered_packets as f64 / self.offered_packets as f64
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Requests {
    pub capacity_requests: u64,
    pub cno_reports: u64,
    pub rbdc_kbps: u64,
    pub vbdc_kbytes: u64,
    pub avbdc_kbytes: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Allocation {
    pub allocated: u64,
    pub unsupported: u64,
    pub congested: u64,
    pub granted_slots: u64,
    pub granted_bytes: u64,
    pub max_frame_load: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Arq {
    pub transmitted: u64,
    pub retransmitted: u64,
    pub flushed: u64,
    pub lost_frames: u64,
    pub lost_acks: u64,
    pub acks_received: u64,
    pub skipped: u64,
    pub delivered_packets: u64,
    pub delivered_bytes: u64,
    pub dropped_packets: u64,
}

impl event::Subscriber for Report {
    fn on_capacity_request_sent(&mut self, _meta: &Meta, event: &event::CapacityRequestSent) {
        self.requests.capacity_requests += 1;
        for element in &event.elements {
            let value = element.value as u64;
            match element.category {
                Category::Rbdc => self.requests.rbdc_kbps += value,
                Category::Vbdc => self.requests.vbdc_kbytes += value,
                Category::Avbdc => self.requests.avbdc_kbytes += value,
                Category::Cra => {}
            }
        }
    }

    fn on_cno_report_sent(&mut self, _meta: &Meta, _event: &event::CnoReportSent) {
        self.requests.cno_reports += 1;
    }

    fn on_terminal_allocated(&mut self, _meta: &Meta, _event: &event::TerminalAllocated) {
        self.allocation.allocated += 1;
    }

    fn on_terminal_unallocated(&mut self, _meta: &Meta, event: &event::TerminalUnallocated) {
        use dama_core::frame::AllocationFailure;

        match event.reason {
            AllocationFailure::UnsupportedChannelQuality => self.allocation.unsupported += 1,
            AllocationFailure::Congested => self.allocation.congested += 1,
        }
    }

    fn on_waveform_allocated(&mut self, _meta: &Meta, _event: &event::WaveformAllocated) {
        self.allocation.granted_slots += 1;
    }

    fn on_frame_load(&mut self, _meta: &Meta, event: &event::FrameLoad) {
        self.allocation.max_frame_load = self.allocation.max_frame_load.max(event.load);
    }

    fn on_arq_pdu_transmitted(&mut self, _meta: &Meta, event: &event::ArqPduTransmitted) {
        if event.is_retransmission {
            self.arq.retransmitted += 1;
        } else {
            self.arq.transmitted += 1;
        }
    }

    fn on_arq_ack_received(&mut self, _meta: &Meta, event: &event::ArqAckReceived) {
        if event.known {
            self.arq.acks_received += 1;
        }
    }

    fn on_arq_pdu_flushed(&mut self, _meta: &Meta, _event: &event::ArqPduFlushed) {
        self.arq.flushed += 1;
    }

    fn on_arq_gap_skipped(&mut self, _meta: &Meta, event: &event::ArqGapSkipped) {
        self.arq.skipped += (event.end - event.start) as u64;
    }

    fn on_packet_reassembled(&mut self, _meta: &Meta, event: &event::PacketReassembled) {
        self.arq.delivered_packets += 1;
        self.arq.delivered_bytes += event.bytes as u64;
    }

    fn on_packet_dropped(&mut self, _meta: &Meta, _event: &event::PacketDropped) {
        self.arq.dropped_packets += 1;
    }
}
