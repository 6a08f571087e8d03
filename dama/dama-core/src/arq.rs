// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Automatic repeat request over a single logical link
//!
//! Both ends of a link (source, destination, flow) run an [`Encapsulator`].
//! The source fragments queued packets into sequence numbered frames and
//! retransmits them until acknowledged or until the retransmission budget is
//! exhausted. The destination acknowledges every frame, reorders frames by
//! their unwrapped sequence number and reassembles packets in order. A missing
//! frame only stalls delivery until the waiting timer of a later frame
//! expires, or until a frame a full window ahead of it arrives.

use crate::{
    address::Address,
    control::{self, ArqAck},
    encapsulation::{EnqueueError, Fragmenter, Reassembler},
    error::Kind,
    event::{self, Meta},
    time::{
        timer::{self, Timer},
        Timestamp,
    },
    Result,
};
use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, trace};

mod config;
mod frame;
mod sequence;
#[cfg(test)]
mod tests;

pub use config::{Config, MAX_WINDOW_SIZE};
pub use frame::Frame;
pub use sequence::SequenceNumbers;

/// A transmitted frame awaiting its acknowledgement
#[derive(Debug)]
struct Context {
    sequence_number: u8,
    frame: Bytes,
    retransmissions: u32,
    timer: Timer,
}

/// A received frame waiting in the reordering buffer
#[derive(Debug)]
struct Buffered {
    frame: Frame,
    timer: Timer,
}

pub struct Encapsulator {
    config: Config,
    source: Address,
    destination: Address,
    flow_id: u8,

    fragmenter: Fragmenter,
    sequence_numbers: SequenceNumbers,
    transmitted: BTreeMap<u8, Context>,
    /// Frames pending retransmission, oldest first
    retransmissions: VecDeque<Context>,
    retransmission_bytes: usize,

    next_expected: u32,
    reordering: BTreeMap<u32, Buffered>,
    reassembler: Reassembler,
    delivered: VecDeque<Bytes>,

    control_sink: Option<Box<dyn control::Sink>>,
}

impl core::fmt::Debug for Encapsulator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Encapsulator")
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("flow_id", &self.flow_id)
            .field("transmitted", &self.transmitted.len())
            .field("retransmissions", &self.retransmissions.len())
            .field("next_expected", &self.next_expected)
            .field("reordering", &self.reordering.len())
            .finish()
    }
}

impl Encapsulator {
    pub fn new(config: Config, source: Address, destination: Address, flow_id: u8) -> Self {
        Self {
            sequence_numbers: SequenceNumbers::new(config.window_size),
            config,
            source,
            destination,
            flow_id,
            fragmenter: Fragmenter::default(),
            transmitted: BTreeMap::new(),
            retransmissions: VecDeque::new(),
            retransmission_bytes: 0,
            next_expected: 0,
            reordering: BTreeMap::new(),
            reassembler: Reassembler::default(),
            delivered: VecDeque::new(),
            control_sink: None,
        }
    }

    /// Registers the channel acknowledgements are sent through
    pub fn set_control_sink<S: control::Sink + 'static>(&mut self, sink: S) {
        self.control_sink = Some(Box::new(sink));
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn source(&self) -> Address {
        self.source
    }

    #[inline]
    pub fn destination(&self) -> Address {
        self.destination
    }

    #[inline]
    pub fn flow_id(&self) -> u8 {
        self.flow_id
    }

    /// Queues an upper layer packet for transmission
    pub fn enqueue(&mut self, packet: Bytes) -> Result<(), EnqueueError> {
        self.fragmenter.enqueue(packet)
    }

    /// Bytes waiting for a transmit opportunity, including retransmissions
    #[inline]
    pub fn tx_buffer_size_in_bytes(&self) -> usize {
        self.fragmenter.buffered_bytes() + self.retransmission_bytes
    }

    /// Frames sent and neither acknowledged nor flushed yet
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.transmitted.len() + self.retransmissions.len()
    }

    /// Returns the frame to send in a transmit opportunity of `bytes`
    pub fn notify_tx_opportunity<Sub: event::Subscriber>(
        &mut self,
        bytes: usize,
        now: Timestamp,
        subscriber: &mut Sub,
    ) -> Option<Bytes> {
        if self
            .retransmissions
            .front()
            .is_some_and(|context| context.frame.len() <= bytes)
        {
            let mut context = self.retransmissions.pop_front()?;
            self.retransmission_bytes -= context.frame.len();
            context.timer.set(now + self.config.retransmission_timer);

            debug!(
                flow_id = self.flow_id,
                sequence_number = context.sequence_number,
                retransmissions = context.retransmissions,
                "retransmitting ARQ frame"
            );
            let frame = self.on_transmit(context, true, now, subscriber);
            return Some(frame);
        }

        ensure!(self.sequence_numbers.is_available(), None);
        let max_pdu_len = bytes.checked_sub(self.config.header_size)?;
        let pdu = self.fragmenter.next_pdu(max_pdu_len)?;
        let sequence_number = self.sequence_numbers.allocate()?;

        let frame = Frame {
            sequence_number,
            pdu,
        }
        .encode(self.config.header_size);

        let mut timer = Timer::default();
        timer.set(now + self.config.retransmission_timer);
        let context = Context {
            sequence_number,
            frame,
            retransmissions: 0,
            timer,
        };

        trace!(flow_id = self.flow_id, sequence_number, "transmitting ARQ frame");
        Some(self.on_transmit(context, false, now, subscriber))
    }

    fn on_transmit<Sub: event::Subscriber>(
        &mut self,
        context: Context,
        is_retransmission: bool,
        now: Timestamp,
        subscriber: &mut Sub,
    ) -> Bytes {
        let frame = context.frame.clone();
        subscriber.on_arq_pdu_transmitted(
            &Meta::new(now),
            &event::ArqPduTransmitted {
                flow_id: self.flow_id,
                sequence_number: context.sequence_number,
                bytes: frame.len(),
                retransmission_count: context.retransmissions,
                is_retransmission,
            },
        );
        self.transmitted.insert(context.sequence_number, context);
        frame
    }

    /// Processes an acknowledgement from the destination
    pub fn on_ack<Sub: event::Subscriber>(
        &mut self,
        ack: ArqAck,
        now: Timestamp,
        subscriber: &mut Sub,
    ) {
        let sequence_number = ack.sequence_number;

        let known = if self.transmitted.remove(&sequence_number).is_some() {
            true
        } else if let Some(index) = self
            .retransmissions
            .iter()
            .position(|context| context.sequence_number == sequence_number)
        {
            if let Some(context) = self.retransmissions.remove(index) {
                self.retransmission_bytes -= context.frame.len();
            }
            true
        } else {
            false
        };

        if known {
            self.sequence_numbers.release(sequence_number);
        } else {
            trace!(flow_id = self.flow_id, sequence_number, "ignoring unknown ARQ ACK");
        }

        subscriber.on_arq_ack_received(
            &Meta::new(now),
            &event::ArqAckReceived {
                flow_id: self.flow_id,
                sequence_number,
                known,
            },
        );
    }

    /// Processes a frame received from the source
    ///
    /// Frames that fail to decode are discarded without an acknowledgement.
    pub fn on_frame_received<Sub: event::Subscriber>(
        &mut self,
        bytes: &[u8],
        now: Timestamp,
        subscriber: &mut Sub,
    ) -> Result {
        let frame = match Frame::decode(bytes, self.config.header_size) {
            Ok(frame) => frame,
            Err(error) => {
                debug!(flow_id = self.flow_id, %error, "discarding malformed ARQ frame");
                return Ok(());
            }
        };

        let sequence_number = frame.sequence_number;
        self.send_ack(sequence_number, now, subscriber)?;

        let continuous = match self.unwrap_sequence_number(sequence_number) {
            Some(continuous) if !self.reordering.contains_key(&continuous) => continuous,
            _ => {
                trace!(flow_id = self.flow_id, sequence_number, "discarding duplicate ARQ frame");
                return Ok(());
            }
        };

        let mut timer = Timer::default();
        timer.set(now + self.config.rx_waiting_timer);
        self.reordering.insert(continuous, Buffered { frame, timer });

        // the source only sends a frame once everything a full window behind
        // it was acknowledged or flushed, so those holes never fill
        let window = self.config.window_size as u32;
        if let Some(released) = continuous.saturating_add(1).checked_sub(window) {
            if released > self.next_expected {
                self.advance_to(released, now, subscriber);
            }
        }

        self.reassemble(now, subscriber);

        Ok(())
    }

    /// Returns the next reassembled packet, in order
    #[inline]
    pub fn pop_delivered(&mut self) -> Option<Bytes> {
        self.delivered.pop_front()
    }

    /// The continuous sequence number the receiver waits for
    #[inline]
    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }

    /// Frames held back waiting for a missing predecessor
    #[inline]
    pub fn reordering_len(&self) -> usize {
        self.reordering.len()
    }

    /// Runs the retransmission and waiting timers that expired at `now`
    pub fn on_timeout<Sub: event::Subscriber>(
        &mut self,
        now: Timestamp,
        subscriber: &mut Sub,
    ) -> Result {
        self.on_retransmission_timeout(now, subscriber);
        self.on_waiting_timeout(now, subscriber)
    }

    fn on_retransmission_timeout<Sub: event::Subscriber>(
        &mut self,
        now: Timestamp,
        subscriber: &mut Sub,
    ) {
        // frames still pending retransmission keep consuming their budget
        let pending = core::mem::take(&mut self.retransmissions);
        self.retransmission_bytes = 0;
        for mut context in pending {
            if context.timer.poll_expiration(now).is_ready() {
                self.retry_or_flush(context, now, subscriber);
            } else {
                self.retransmission_bytes += context.frame.len();
                self.retransmissions.push_back(context);
            }
        }

        let expired: Vec<u8> = self
            .transmitted
            .iter_mut()
            .filter_map(|(sequence_number, context)| {
                context
                    .timer
                    .poll_expiration(now)
                    .is_ready()
                    .then_some(*sequence_number)
            })
            .collect();

        for sequence_number in expired {
            if let Some(context) = self.transmitted.remove(&sequence_number) {
                self.retry_or_flush(context, now, subscriber);
            }
        }
    }

    fn retry_or_flush<Sub: event::Subscriber>(
        &mut self,
        mut context: Context,
        now: Timestamp,
        subscriber: &mut Sub,
    ) {
        if context.retransmissions < self.config.max_retransmissions {
            context.retransmissions += 1;
            context.timer.set(now + self.config.retransmission_timer);
            trace!(
                flow_id = self.flow_id,
                sequence_number = context.sequence_number,
                retransmissions = context.retransmissions,
                "ARQ frame scheduled for retransmission"
            );
            self.retransmission_bytes += context.frame.len();
            self.retransmissions.push_back(context);
            return;
        }

        debug!(
            flow_id = self.flow_id,
            sequence_number = context.sequence_number,
            "ARQ frame exhausted its retransmissions"
        );
        self.sequence_numbers.release(context.sequence_number);
        subscriber.on_arq_pdu_flushed(
            &Meta::new(now),
            &event::ArqPduFlushed {
                flow_id: self.flow_id,
                sequence_number: context.sequence_number,
                retransmission_count: context.retransmissions,
                bytes: context.frame.len(),
            },
        );
    }

    fn on_waiting_timeout<Sub: event::Subscriber>(
        &mut self,
        now: Timestamp,
        subscriber: &mut Sub,
    ) -> Result {
        while let Some(continuous) = self.poll_waiting_timers(now) {
            self.advance_to(continuous.saturating_add(1), now, subscriber);
            self.send_ack(continuous as u8, now, subscriber)?;
        }

        Ok(())
    }

    /// Moves the next expected number up to at least `end`
    ///
    /// Buffered entries before `end` are still delivered, only the holes
    /// between them are skipped.
    fn advance_to<Sub: event::Subscriber>(
        &mut self,
        end: u32,
        now: Timestamp,
        subscriber: &mut Sub,
    ) {
        loop {
            let first = self.reordering.keys().next().copied();
            let Some(first) = first.filter(|first| *first < end) else {
                break;
            };
            if first > self.next_expected {
                self.skip_to(first, now, subscriber);
            }
            self.reassemble(now, subscriber);
        }

        if self.next_expected < end {
            self.skip_to(end, now, subscriber);
        }
    }

    fn skip_to<Sub: event::Subscriber>(
        &mut self,
        continuous: u32,
        now: Timestamp,
        subscriber: &mut Sub,
    ) {
        debug!(
            flow_id = self.flow_id,
            start = self.next_expected,
            end = continuous,
            "skipping missing ARQ frames"
        );
        let meta = Meta::new(now);
        subscriber.on_arq_gap_skipped(
            &meta,
            &event::ArqGapSkipped {
                flow_id: self.flow_id,
                start: self.next_expected,
                end: continuous,
            },
        );

        let dropped = self.reassembler.discard();
        if dropped > 0 {
            subscriber.on_packet_dropped(
                &meta,
                &event::PacketDropped {
                    flow_id: self.flow_id,
                    bytes: dropped,
                },
            );
        }

        self.next_expected = continuous;
    }

    /// Returns the lowest buffered entry whose waiting timer expired
    fn poll_waiting_timers(&mut self, now: Timestamp) -> Option<u32> {
        self.reordering.iter_mut().find_map(|(continuous, buffered)| {
            buffered
                .timer
                .poll_expiration(now)
                .is_ready()
                .then_some(*continuous)
        })
    }

    /// Delivers the contiguous run of frames starting at the next expected one
    fn reassemble<Sub: event::Subscriber>(&mut self, now: Timestamp, subscriber: &mut Sub) {
        let meta = Meta::new(now);

        while let Some(buffered) = self.reordering.remove(&self.next_expected) {
            subscriber.on_arq_pdu_delivered(
                &meta,
                &event::ArqPduDelivered {
                    flow_id: self.flow_id,
                    sequence_number: self.next_expected,
                },
            );
            self.next_expected = self.next_expected.wrapping_add(1);

            let reassembly = self.reassembler.on_pdu(buffered.frame.pdu);

            if reassembly.dropped_bytes > 0 {
                subscriber.on_packet_dropped(
                    &meta,
                    &event::PacketDropped {
                        flow_id: self.flow_id,
                        bytes: reassembly.dropped_bytes,
                    },
                );
            }

            if let Some(packet) = reassembly.packet {
                subscriber.on_packet_reassembled(
                    &meta,
                    &event::PacketReassembled {
                        flow_id: self.flow_id,
                        bytes: packet.len(),
                    },
                );
                self.delivered.push_back(packet);
            }
        }
    }

    /// Maps a wire sequence number onto the continuous sequence space
    ///
    /// A retransmission is never more than a window behind the next expected
    /// number. Those numbers were already delivered or skipped and map to
    /// `None`, everything else lies ahead.
    fn unwrap_sequence_number(&self, sequence_number: u8) -> Option<u32> {
        let offset = sequence_number.wrapping_sub(self.next_expected as u8) as u32;
        let behind = offset + self.config.window_size as u32 > u8::MAX as u32;
        ensure!(!behind, None);
        self.next_expected.checked_add(offset)
    }

    fn send_ack<Sub: event::Subscriber>(
        &mut self,
        sequence_number: u8,
        now: Timestamp,
        subscriber: &mut Sub,
    ) -> Result {
        let sink = self
            .control_sink
            .as_mut()
            .ok_or_else(|| Kind::MissingControlSink.err())?;

        subscriber.on_arq_ack_sent(
            &Meta::new(now),
            &event::ArqAckSent {
                flow_id: self.flow_id,
                sequence_number,
            },
        );

        sink.send(
            ArqAck {
                flow_id: self.flow_id,
                sequence_number,
            }
            .into(),
            self.source,
        );

        Ok(())
    }
}

impl timer::Provider for Encapsulator {
    fn next_expiration(&self) -> Option<Timestamp> {
        self.transmitted
            .values()
            .chain(self.retransmissions.iter())
            .map(|context| context.timer.expiration())
            .chain(self.reordering.values().map(|buffered| buffered.timer.expiration()))
            .fold(None, timer::earliest)
    }
}
