// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Queue statistics consumed by the request manager

use crate::time::{Duration, Timestamp};

/// Statistics of one request class queue over the last sampling interval
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Stats {
    pub incoming_rate_kbps: f64,
    pub outgoing_rate_kbps: f64,
    pub volume_in_bytes: u32,
    pub volume_out_bytes: u32,
    pub queue_size_bytes: u32,
}

/// Notifications a queue sends to the request manager
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// The first packet was buffered into an empty queue
    FirstBufferedPacket,
    /// A packet was buffered into a non-empty queue
    BufferedPacket,
}

/// Source of per request class queue statistics
pub trait Provider {
    /// Returns the statistics gathered since the previous reset. When `reset`
    /// is set, a new sampling interval is started.
    fn stats(&mut self, reset: bool) -> Stats;
}

impl<F: FnMut(bool) -> Stats> Provider for F {
    #[inline]
    fn stats(&mut self, reset: bool) -> Stats {
        (self)(reset)
    }
}

/// Accumulates queue statistics between samples
#[derive(Clone, Debug, Default)]
pub struct Statistics {
    queue_size_bytes: u32,
    volume_in_bytes: u32,
    volume_out_bytes: u32,
    interval_start: Timestamp,
}

impl Statistics {
    pub fn new(now: Timestamp) -> Self {
        Self {
            interval_start: now,
            ..Default::default()
        }
    }

    /// Records a packet entering the queue and returns the matching event
    pub fn on_enqueue(&mut self, bytes: u32) -> Event {
        let event = if self.queue_size_bytes == 0 {
            Event::FirstBufferedPacket
        } else {
            Event::BufferedPacket
        };
        self.queue_size_bytes = self.queue_size_bytes.saturating_add(bytes);
        self.volume_in_bytes = self.volume_in_bytes.saturating_add(bytes);
        event
    }

    /// Records bytes leaving the queue
    pub fn on_dequeue(&mut self, bytes: u32) {
        let bytes = bytes.min(self.queue_size_bytes);
        self.queue_size_bytes -= bytes;
        self.volume_out_bytes = self.volume_out_bytes.saturating_add(bytes);
    }

    #[inline]
    pub fn queue_size_bytes(&self) -> u32 {
        self.queue_size_bytes
    }

    /// Samples the statistics at `now`
    pub fn sample(&mut self, now: Timestamp, reset: bool) -> Stats {
        let elapsed = now.saturating_duration_since(self.interval_start);
        let stats = Stats {
            incoming_rate_kbps: rate_kbps(self.volume_in_bytes, elapsed),
            outgoing_rate_kbps: rate_kbps(self.volume_out_bytes, elapsed),
            volume_in_bytes: self.volume_in_bytes,
            volume_out_bytes: self.volume_out_bytes,
            queue_size_bytes: self.queue_size_bytes,
        };

        if reset {
            self.volume_in_bytes = 0;
            self.volume_out_bytes = 0;
            self.interval_start = now;
        }

        stats
    }
}

#[inline]
fn rate_kbps(bytes: u32, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    ensure!(secs > 0.0, 0.0);
    8.0 * bytes as f64 / secs / 1000.0
}
