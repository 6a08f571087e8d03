// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Observable events emitted by the access network components
//!
//! Components publish events synchronously to a [`Subscriber`] passed into
//! each call. Subscribers compose: a tuple `(A, B)` or a `Vec` of
//! subscribers notifies each member in order.

use crate::{
    address::Address,
    control::{Category, ControlElement},
    frame::{AllocationFailure, CcLevel},
    service::RcIndex,
    time::Timestamp,
};

/// All events types which can be emitted from this library.
pub trait Event {
    const NAME: &'static str;
}

/// Fields common to all events
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Meta {
    pub timestamp: Timestamp,
}

impl Meta {
    #[inline]
    pub fn new(timestamp: Timestamp) -> Self {
        Self { timestamp }
    }
}

/// A capacity request was handed to the control sink
#[derive(Clone, Debug, PartialEq)]
pub struct CapacityRequestSent {
    pub source: Address,
    pub destination: Address,
    pub elements: Vec<ControlElement>,
    pub cno_estimate: Option<f64>,
}

/// A non-zero RBDC rate was computed for a request class
#[derive(Clone, Debug, PartialEq)]
pub struct RbdcRequested {
    pub source: Address,
    pub rc: RcIndex,
    pub rate_kbps: u32,
    pub queue_size_bytes: u32,
}

/// A non-zero VBDC or AVBDC volume was computed for a request class
#[derive(Clone, Debug, PartialEq)]
pub struct VbdcRequested {
    pub source: Address,
    pub rc: RcIndex,
    pub category: Category,
    pub volume_kbytes: u32,
    pub queue_size_bytes: u32,
}

/// A periodic channel quality report was handed to the control sink
#[derive(Clone, Debug, PartialEq)]
pub struct CnoReportSent {
    pub source: Address,
    pub destination: Address,
    pub cno_estimate: Option<f64>,
}

/// A terminal request was admitted by a frame
#[derive(Clone, Debug, PartialEq)]
pub struct TerminalAllocated {
    pub terminal: Address,
    pub frame_id: u8,
    pub waveform_id: u32,
    pub cc_level: CcLevel,
}

/// A terminal request could not be admitted this cycle
#[derive(Clone, Debug, PartialEq)]
pub struct TerminalUnallocated {
    pub terminal: Address,
    pub reason: AllocationFailure,
}

/// A time slot was granted with the given waveform
#[derive(Clone, Debug, PartialEq)]
pub struct WaveformAllocated {
    pub waveform_id: u32,
}

/// The number of terminals granted slots in a frame
#[derive(Clone, Debug, PartialEq)]
pub struct TerminalLoad {
    pub frame_id: u8,
    pub terminal_count: u32,
}

/// The share of a frame's symbols granted this superframe
#[derive(Clone, Debug, PartialEq)]
pub struct FrameLoad {
    pub frame_id: u8,
    pub load: f64,
}

/// An ARQ PDU was handed to the lower layer
#[derive(Clone, Debug, PartialEq)]
pub struct ArqPduTransmitted {
    pub flow_id: u8,
    pub sequence_number: u8,
    pub bytes: usize,
    pub retransmission_count: u32,
    pub is_retransmission: bool,
}

/// An ARQ acknowledgement arrived at the sender
#[derive(Clone, Debug, PartialEq)]
pub struct ArqAckReceived {
    pub flow_id: u8,
    pub sequence_number: u8,
    /// False when the sequence number was not outstanding
    pub known: bool,
}

/// An ARQ PDU exhausted its retransmissions and was dropped
#[derive(Clone, Debug, PartialEq)]
pub struct ArqPduFlushed {
    pub flow_id: u8,
    pub sequence_number: u8,
    pub retransmission_count: u32,
    pub bytes: usize,
}

/// The receiver acknowledged an ARQ PDU
#[derive(Clone, Debug, PartialEq)]
pub struct ArqAckSent {
    pub flow_id: u8,
    pub sequence_number: u8,
}

/// The receiver released a PDU to reassembly in order
#[derive(Clone, Debug, PartialEq)]
pub struct ArqPduDelivered {
    pub flow_id: u8,
    pub sequence_number: u32,
}

/// The receiver gave up waiting for the sequence numbers in `start..end`
#[derive(Clone, Debug, PartialEq)]
pub struct ArqGapSkipped {
    pub flow_id: u8,
    pub start: u32,
    pub end: u32,
}

/// An upper layer packet was reassembled and delivered
#[derive(Clone, Debug, PartialEq)]
pub struct PacketReassembled {
    pub flow_id: u8,
    pub bytes: usize,
}

/// A partially reassembled upper layer packet was discarded
#[derive(Clone, Debug, PartialEq)]
pub struct PacketDropped {
    pub flow_id: u8,
    pub bytes: usize,
}

macro_rules! events {
    ($(
        $(#[doc = $doc:literal])*
        #[name = $name:literal]
        fn $handler:ident($event:ident);
    )*) => {
        /// Receives events published by the access network components
        ///
        /// Every method has an empty default implementation so subscribers
        /// only implement the events they are interested in.
        pub trait Subscriber {
            $(
                $(#[doc = $doc])*
                #[inline]
                fn $handler(&mut self, meta: &Meta, event: &$event) {
                    let _ = (meta, event);
                }
            )*
        }

        $(
            impl Event for $event {
                const NAME: &'static str = $name;
            }
        )*

        impl Subscriber for () {}

        impl<A, B> Subscriber for (A, B)
        where
            A: Subscriber,
            B: Subscriber,
        {
            $(
                #[inline]
                fn $handler(&mut self, meta: &Meta, event: &$event) {
                    self.0.$handler(meta, event);
                    self.1.$handler(meta, event);
                }
            )*
        }

        impl<S: Subscriber + ?Sized> Subscriber for &mut S {
            $(
                #[inline]
                fn $handler(&mut self, meta: &Meta, event: &$event) {
                    (**self).$handler(meta, event);
                }
            )*
        }

        impl<S: Subscriber + ?Sized> Subscriber for Box<S> {
            $(
                #[inline]
                fn $handler(&mut self, meta: &Meta, event: &$event) {
                    (**self).$handler(meta, event);
                }
            )*
        }

        impl<S: Subscriber> Subscriber for Vec<S> {
            $(
                #[inline]
                fn $handler(&mut self, meta: &Meta, event: &$event) {
                    for subscriber in self.iter_mut() {
                        subscriber.$handler(meta, event);
                    }
                }
            )*
        }

        pub mod tracing {
            //! Forwards every event to the `tracing` crate
            use super::*;

            #[derive(Clone, Debug)]
            pub struct Subscriber {
                root: ::tracing::Span,
            }

            impl Default for Subscriber {
                fn default() -> Self {
                    let root = ::tracing::span!(target: "dama", ::tracing::Level::DEBUG, "dama");
                    Self { root }
                }
            }

            impl super::Subscriber for Subscriber {
                $(
                    #[inline]
                    fn $handler(&mut self, meta: &Meta, event: &$event) {
                        let id = self.root.id();
                        ::tracing::event!(
                            target: $name,
                            parent: id,
                            ::tracing::Level::DEBUG,
                            timestamp = %meta.timestamp,
                            event = ?event
                        );
                    }
                )*
            }
        }

        #[cfg(any(test, feature = "testing"))]
        pub mod testing {
            //! Records every event for later assertions
            use super::Meta;

            #[derive(Clone, Debug, PartialEq)]
            pub enum Event {
                $($event(super::$event),)*
            }

            #[derive(Clone, Debug, Default)]
            pub struct Subscriber {
                pub events: Vec<(Meta, Event)>,
            }

            impl Subscriber {
                /// Iterates over the recorded events in publication order
                pub fn iter(&self) -> impl Iterator<Item = &Event> {
                    self.events.iter().map(|(_, event)| event)
                }

                pub fn clear(&mut self) {
                    self.events.clear();
                }
            }

            impl super::Subscriber for Subscriber {
                $(
                    #[inline]
                    fn $handler(&mut self, meta: &Meta, event: &super::$event) {
                        self.events.push((*meta, Event::$event(event.clone())));
                    }
                )*
            }
        }
    };
}

events!(
    #[name = "capacity_request_sent"]
    fn on_capacity_request_sent(CapacityRequestSent);

    #[name = "rbdc_requested"]
    fn on_rbdc_requested(RbdcRequested);

    #[name = "vbdc_requested"]
    fn on_vbdc_requested(VbdcRequested);

    #[name = "cno_report_sent"]
    fn on_cno_report_sent(CnoReportSent);

    #[name = "terminal_allocated"]
    fn on_terminal_allocated(TerminalAllocated);

    #[name = "terminal_unallocated"]
    fn on_terminal_unallocated(TerminalUnallocated);

    /// Called once per generated time slot
    #[name = "waveform_allocated"]
    fn on_waveform_allocated(WaveformAllocated);

    #[name = "terminal_load"]
    fn on_terminal_load(TerminalLoad);

    #[name = "frame_load"]
    fn on_frame_load(FrameLoad);

    #[name = "arq_pdu_transmitted"]
    fn on_arq_pdu_transmitted(ArqPduTransmitted);

    #[name = "arq_ack_received"]
    fn on_arq_ack_received(ArqAckReceived);

    /// Reports data loss after the maximum number of retransmissions
    #[name = "arq_pdu_flushed"]
    fn on_arq_pdu_flushed(ArqPduFlushed);

    #[name = "arq_ack_sent"]
    fn on_arq_ack_sent(ArqAckSent);

    #[name = "arq_pdu_delivered"]
    fn on_arq_pdu_delivered(ArqPduDelivered);

    /// Reports sequence numbers abandoned by the receiver
    #[name = "arq_gap_skipped"]
    fn on_arq_gap_skipped(ArqGapSkipped);

    #[name = "packet_reassembled"]
    fn on_packet_reassembled(PacketReassembled);

    #[name = "packet_dropped"]
    fn on_packet_dropped(PacketDropped);
);
