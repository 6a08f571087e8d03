// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::{
    control::Message,
    event::testing::{self, Event},
    time::{timer::Provider as _, Duration},
};
use bolero::{check, generator::*};
use std::{
    cell::RefCell,
    collections::{BTreeSet, HashMap},
    ops::Range,
    rc::Rc,
};

const TERMINAL: Address = Address::from_node_id(7);
const GATEWAY: Address = Address::from_node_id(1);
const FLOW: u8 = 3;

type Acks = Rc<RefCell<Vec<(Message, Address)>>>;

fn encapsulator(config: Config) -> (Encapsulator, Acks) {
    let mut encapsulator = Encapsulator::new(config, TERMINAL, GATEWAY, FLOW);
    let acks: Acks = Default::default();
    let sink = acks.clone();
    encapsulator.set_control_sink(move |message: Message, destination: Address| {
        sink.borrow_mut().push((message, destination));
    });
    (encapsulator, acks)
}

struct Link {
    sender: Encapsulator,
    receiver: Encapsulator,
    acks: Acks,
    subscriber: testing::Subscriber,
    now: Timestamp,
}

impl Link {
    fn new(config: Config) -> Self {
        crate::testing::init_tracing();
        let (sender, _) = encapsulator(config);
        let (receiver, acks) = encapsulator(config);
        Self {
            sender,
            receiver,
            acks,
            subscriber: Default::default(),
            now: Timestamp::ZERO,
        }
    }

    fn enqueue(&mut self, packet: Bytes) {
        self.sender.enqueue(packet).unwrap();
    }

    fn transmit(&mut self, bytes: usize) -> Option<Bytes> {
        self.sender
            .notify_tx_opportunity(bytes, self.now, &mut self.subscriber)
    }

    fn receive(&mut self, frame: &[u8]) {
        self.receiver
            .on_frame_received(frame, self.now, &mut self.subscriber)
            .unwrap();
    }

    /// Acknowledged sequence numbers sent by the receiver since the last call
    fn take_acks(&self) -> Vec<u8> {
        core::mem::take(&mut *self.acks.borrow_mut())
            .into_iter()
            .map(|(message, destination)| {
                assert_eq!(destination, TERMINAL);
                match message {
                    Message::ArqAck(ack) => {
                        assert_eq!(ack.flow_id, FLOW);
                        ack.sequence_number
                    }
                    other => panic!("unexpected message {other:?}"),
                }
            })
            .collect()
    }

    fn forward_acks(&mut self) {
        for sequence_number in self.take_acks() {
            self.ack(sequence_number);
        }
    }

    fn ack(&mut self, sequence_number: u8) {
        let ack = ArqAck {
            flow_id: FLOW,
            sequence_number,
        };
        self.sender.on_ack(ack, self.now, &mut self.subscriber);
    }

    fn delivered(&mut self) -> Vec<Bytes> {
        core::iter::from_fn(|| self.receiver.pop_delivered()).collect()
    }

    /// Advances to the earliest timer of either end and runs both
    fn tick(&mut self) {
        let next = timer::earliest(
            self.sender.next_expiration(),
            self.receiver.next_expiration(),
        );
        self.now = next.unwrap();
        self.sender
            .on_timeout(self.now, &mut self.subscriber)
            .unwrap();
        self.receiver
            .on_timeout(self.now, &mut self.subscriber)
            .unwrap();
    }

    /// Runs both ends until no timer is armed, without losing anything
    fn drain(&mut self) {
        loop {
            while let Some(frame) = self.transmit(1500) {
                self.receive(&frame);
                self.forward_acks();
            }
            if self.sender.next_expiration().is_none() && self.receiver.next_expiration().is_none()
            {
                return;
            }
            self.tick();
            self.forward_acks();
        }
    }

    fn events(&self) -> impl Iterator<Item = &Event> {
        self.subscriber.iter()
    }

    fn skipped(&self) -> Vec<Range<u32>> {
        self.events()
            .filter_map(|event| match event {
                Event::ArqGapSkipped(event) => Some(event.start..event.end),
                _ => None,
            })
            .collect()
    }
}

fn packet(index: usize, len: usize) -> Bytes {
    (0..len).map(|i| (index * 31 + i) as u8).collect()
}

/// A sequence number whose ACK is lost is retransmitted once and delivered once
#[test]
fn lost_ack_test() {
    let mut link = Link::new(Config::default());
    for index in 0..4 {
        link.enqueue(packet(index, 10));
    }

    let frames: Vec<_> = core::iter::from_fn(|| link.transmit(100)).collect();
    assert_eq!(frames.len(), 4);
    assert_eq!(link.sender.outstanding(), 4);

    for frame in &frames {
        link.receive(frame);
    }
    let acks = link.take_acks();
    assert_eq!(acks, [0, 1, 2, 3]);
    for sequence_number in [0, 2, 3] {
        link.ack(sequence_number);
    }
    assert_eq!(link.sender.outstanding(), 1);
    assert_eq!(
        link.delivered(),
        (0..4).map(|index| packet(index, 10)).collect::<Vec<_>>()
    );

    link.tick();
    assert_eq!(link.now, Timestamp::ZERO + Duration::from_millis(600));
    assert_eq!(link.sender.tx_buffer_size_in_bytes(), frames[1].len());

    // too small for the pending retransmission and nothing new to send
    assert!(link.transmit(frames[1].len() - 1).is_none());

    let retransmitted = link.transmit(100).unwrap();
    assert_eq!(retransmitted, frames[1]);
    assert_eq!(link.sender.tx_buffer_size_in_bytes(), 0);

    link.receive(&retransmitted);
    link.forward_acks();
    assert_eq!(link.sender.outstanding(), 0);
    assert!(link.delivered().is_empty());

    let retransmissions: Vec<_> = link
        .events()
        .filter_map(|event| match event {
            Event::ArqPduTransmitted(event) if event.is_retransmission => Some(event.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        retransmissions,
        [event::ArqPduTransmitted {
            flow_id: FLOW,
            sequence_number: 1,
            bytes: frames[1].len(),
            retransmission_count: 1,
            is_retransmission: true,
        }]
    );

    let delivered = link
        .events()
        .filter(|event| matches!(event, Event::PacketReassembled(_)))
        .count();
    assert_eq!(delivered, 4);
}

#[test]
fn lost_frame_reordering_test() {
    let mut link = Link::new(Config::default());
    for index in 0..4 {
        link.enqueue(packet(index, 10));
    }

    let frames: Vec<_> = core::iter::from_fn(|| link.transmit(100)).collect();
    for (index, frame) in frames.iter().enumerate() {
        if index != 1 {
            link.receive(frame);
        }
    }
    link.forward_acks();
    assert_eq!(link.delivered(), [packet(0, 10)]);
    assert_eq!(link.receiver.reordering_len(), 2);
    assert_eq!(link.receiver.next_expected(), 1);

    link.tick();
    let retransmitted = link.transmit(100).unwrap();
    link.receive(&retransmitted);
    link.forward_acks();

    assert_eq!(
        link.delivered(),
        (1..4).map(|index| packet(index, 10)).collect::<Vec<_>>()
    );
    assert_eq!(link.receiver.reordering_len(), 0);
    assert_eq!(link.receiver.next_expected(), 4);
    assert_eq!(link.sender.outstanding(), 0);
    assert_eq!(link.sender.next_expiration(), None);
    assert_eq!(link.receiver.next_expiration(), None);
}

#[test]
fn flush_test() {
    let config = Config::new().with_window_size(1).unwrap();
    let mut link = Link::new(config);
    link.enqueue(packet(0, 10));
    link.enqueue(packet(1, 10));

    let first = link.transmit(100).unwrap();
    // the window is exhausted until the first frame leaves it
    assert!(link.transmit(100).is_none());

    for retransmission in 1..=2 {
        link.tick();
        assert_eq!(link.transmit(100).unwrap(), first);
        let Some(Event::ArqPduTransmitted(event)) = link.events().last() else {
            panic!("expected a transmission");
        };
        assert_eq!(event.retransmission_count, retransmission);
    }

    link.tick();
    assert_eq!(link.now, Timestamp::ZERO + Duration::from_millis(1800));
    assert_eq!(link.sender.outstanding(), 0);
    assert!(link.events().any(|event| {
        *event
            == Event::ArqPduFlushed(event::ArqPduFlushed {
                flow_id: FLOW,
                sequence_number: 0,
                retransmission_count: 2,
                bytes: first.len(),
            })
    }));

    // the released sequence number frees the window for the next frame
    let second = link.transmit(100).unwrap();
    assert_eq!(second[0], 1);
    link.receive(&second);
    link.forward_acks();
    assert_eq!(link.sender.outstanding(), 0);
}

#[test]
fn expiry_while_pending_retransmission_test() {
    let config = Config::new().with_max_retransmissions(1).unwrap();
    let mut link = Link::new(config);
    link.enqueue(packet(0, 10));
    let frame = link.transmit(100).unwrap();

    link.tick();
    assert_eq!(link.sender.tx_buffer_size_in_bytes(), frame.len());

    // never retransmitted, so the second expiry exhausts the budget
    link.tick();
    assert_eq!(link.sender.outstanding(), 0);
    assert_eq!(link.sender.tx_buffer_size_in_bytes(), 0);
    assert!(link.transmit(100).is_none());
}

#[test]
fn window_test() {
    let config = Config::new().with_window_size(2).unwrap();
    let mut link = Link::new(config);
    for index in 0..3 {
        link.enqueue(packet(index, 10));
    }

    assert!(link.transmit(100).is_some());
    assert!(link.transmit(100).is_some());
    assert!(link.transmit(100).is_none());

    // the window slides only once its oldest number is released
    link.ack(1);
    assert!(link.transmit(100).is_none());
    link.ack(0);
    assert_eq!(link.transmit(100).unwrap()[0], 2);
}

#[test]
fn unknown_ack_test() {
    let mut link = Link::new(Config::default());
    link.ack(5);
    assert_eq!(
        link.events().collect::<Vec<_>>(),
        [&Event::ArqAckReceived(event::ArqAckReceived {
            flow_id: FLOW,
            sequence_number: 5,
            known: false,
        })]
    );
}

#[test]
fn waiting_timer_skip_test() {
    let mut link = Link::new(Config::default());
    link.enqueue(packet(0, 30));
    link.enqueue(packet(1, 5));

    // start, continuation, end and a full PDU
    let frames: Vec<_> = core::iter::from_fn(|| link.transmit(16)).collect();
    assert_eq!(frames.len(), 4);

    for (index, frame) in frames.iter().enumerate() {
        if index != 1 {
            link.receive(frame);
        }
    }
    assert_eq!(link.take_acks(), [0, 2, 3]);
    assert!(link.delivered().is_empty());

    // the sender gives up on the lost frame first
    for sequence_number in [0, 2, 3] {
        link.ack(sequence_number);
    }
    while link.receiver.reordering_len() > 0 {
        link.tick();
    }
    assert_eq!(link.now, Timestamp::ZERO + Duration::from_millis(1800));

    assert_eq!(link.delivered(), [packet(1, 5)]);
    assert_eq!(link.receiver.next_expected(), 4);
    // the expired entry is acknowledged once more
    assert_eq!(link.take_acks(), [2]);

    let skipped: Vec<_> = link
        .events()
        .filter_map(|event| match event {
            Event::ArqGapSkipped(event) => Some((event.start, event.end)),
            _ => None,
        })
        .collect();
    assert_eq!(skipped, [(1, 2)]);

    let dropped: Vec<_> = link
        .events()
        .filter_map(|event| match event {
            Event::PacketDropped(event) => Some(event.bytes),
            _ => None,
        })
        .collect();
    // the buffered start and the orphaned end
    assert_eq!(dropped, [11, 6]);
}

#[test]
fn duplicate_frame_test() {
    let mut link = Link::new(Config::default());
    link.enqueue(packet(0, 10));
    link.enqueue(packet(1, 10));
    let first = link.transmit(100).unwrap();
    let second = link.transmit(100).unwrap();

    link.receive(&second);
    link.receive(&second);
    link.receive(&first);
    link.receive(&first);

    assert_eq!(link.take_acks(), [1, 1, 0, 0]);
    assert_eq!(link.delivered(), [packet(0, 10), packet(1, 10)]);
}

#[test]
fn malformed_frame_test() {
    let mut link = Link::new(Config::new().with_header_size(4).unwrap());
    link.receive(&[]);
    link.receive(&[0, 0, 0]);
    assert!(link.take_acks().is_empty());
    assert_eq!(link.receiver.next_expected(), 0);
}

#[test]
fn missing_control_sink_test() {
    let mut sender = Encapsulator::new(Config::default(), TERMINAL, GATEWAY, FLOW);
    let mut receiver = Encapsulator::new(Config::default(), TERMINAL, GATEWAY, FLOW);
    sender.enqueue(packet(0, 10)).unwrap();
    let frame = sender
        .notify_tx_opportunity(100, Timestamp::ZERO, &mut ())
        .unwrap();

    let error = receiver
        .on_frame_received(&frame, Timestamp::ZERO, &mut ())
        .unwrap_err();
    assert_eq!(*error.kind(), Kind::MissingControlSink);
}

#[test]
fn padded_header_test() {
    let config = Config::new().with_header_size(3).unwrap();
    let mut link = Link::new(config);
    link.enqueue(packet(0, 10));

    // no room for any payload behind the padded header
    assert!(link.transmit(7).is_none());
    let frame = link.transmit(14).unwrap();
    assert_eq!(frame.len(), 14);

    link.receive(&frame);
    assert_eq!(link.delivered(), [packet(0, 10)]);
}

/// A flushed frame at the head of a full window does not stall the frames
/// the source sends once its window has moved past the flushed one
#[test]
fn flushed_head_of_full_window_test() {
    let config = Config::new()
        .with_window_size(MAX_WINDOW_SIZE)
        .unwrap()
        .with_max_retransmissions(0)
        .unwrap();
    let mut link = Link::new(config);
    // enough packets to wrap the sequence numbers
    for index in 0..300 {
        link.enqueue(packet(index, 10));
    }

    let frames: Vec<_> = core::iter::from_fn(|| link.transmit(100)).collect();
    assert_eq!(frames.len(), MAX_WINDOW_SIZE as usize);

    // the first frame is lost
    for frame in &frames[1..] {
        link.receive(frame);
    }
    link.forward_acks();
    assert!(link.transmit(100).is_none());

    link.tick();
    assert_eq!(link.now, Timestamp::ZERO + Duration::from_millis(600));
    assert_eq!(link.sender.outstanding(), 0);
    assert_eq!(link.receiver.next_expected(), 0);

    // the next frame is a full window ahead of the lost one
    let frame = link.transmit(100).unwrap();
    link.receive(&frame);
    assert_eq!(link.receiver.next_expected(), MAX_WINDOW_SIZE as u32 + 1);
    assert_eq!(link.receiver.reordering_len(), 0);
    link.forward_acks();

    link.drain();

    assert_eq!(
        link.delivered(),
        (1..300).map(|index| packet(index, 10)).collect::<Vec<_>>()
    );
    assert_eq!(link.skipped(), [0..1]);
    let flushed = link
        .events()
        .filter(|event| matches!(event, Event::ArqPduFlushed(_)))
        .count();
    assert_eq!(flushed, 1);
    assert_eq!(link.sender.outstanding(), 0);
}

#[test]
fn wide_window_retransmission_is_duplicate_test() {
    let config = Config::new().with_window_size(MAX_WINDOW_SIZE).unwrap();
    let mut link = Link::new(config);
    for index in 0..MAX_WINDOW_SIZE as usize {
        link.enqueue(packet(index, 10));
    }

    let frames: Vec<_> = core::iter::from_fn(|| link.transmit(100)).collect();
    for frame in &frames {
        link.receive(frame);
    }
    assert_eq!(link.delivered().len(), MAX_WINDOW_SIZE as usize);
    // every ACK is lost
    link.take_acks();

    // the oldest frame comes back a full window behind the receiver
    link.tick();
    let frame = link.transmit(100).unwrap();
    assert_eq!(frame[0], 0);
    link.receive(&frame);

    assert_eq!(link.take_acks(), [0]);
    assert!(link.delivered().is_empty());
    assert_eq!(link.receiver.next_expected(), MAX_WINDOW_SIZE as u32);
    assert_eq!(link.receiver.reordering_len(), 0);
}

#[derive(Debug, TypeGenerator)]
enum DeliveryOperation {
    Enqueue {
        #[generator(1..300)]
        len: usize,
    },
    Transmit {
        #[generator(4..120)]
        bytes: usize,
    },
    /// Delivers one of the frames in flight, possibly out of order
    Receive { index: usize },
}

#[test]
fn exactly_once_in_order_delivery_test() {
    check!()
        .with_type::<Vec<DeliveryOperation>>()
        .for_each(|operations| {
            let mut link = Link::new(Config::default());
            let mut enqueued = vec![];
            let mut in_flight: Vec<Bytes> = vec![];

            for operation in operations {
                match operation {
                    DeliveryOperation::Enqueue { len } => {
                        let packet = packet(enqueued.len(), *len);
                        link.enqueue(packet.clone());
                        enqueued.push(packet);
                    }
                    DeliveryOperation::Transmit { bytes } => {
                        if let Some(frame) = link.transmit(*bytes) {
                            in_flight.push(frame);
                        }
                    }
                    DeliveryOperation::Receive { index } => {
                        if !in_flight.is_empty() {
                            let frame = in_flight.remove(index % in_flight.len());
                            link.receive(&frame);
                            link.forward_acks();
                        }
                    }
                }
                assert!(link.sender.outstanding() <= Config::DEFAULT_WINDOW_SIZE as usize);
            }

            for frame in core::mem::take(&mut in_flight) {
                link.receive(&frame);
            }
            link.forward_acks();

            while let Some(frame) = link.transmit(1500) {
                link.receive(&frame);
                link.forward_acks();
            }

            assert_eq!(link.sender.tx_buffer_size_in_bytes(), 0);
            assert_eq!(link.sender.outstanding(), 0);
            assert_eq!(link.delivered(), enqueued);
        });
}

/// Packets whose index can be read back from any frame carrying them
fn indexed_packet(index: usize, len: usize) -> Bytes {
    let mut packet = (index as u16).to_be_bytes().to_vec();
    packet.extend((2..len).map(|i| (index * 31 + i) as u8));
    packet.into()
}

/// The sequence number and packet index of a frame carrying a full packet
fn frame_packet(frame: &[u8], header_size: usize) -> (u8, usize) {
    let frame = Frame::decode(frame, header_size).unwrap();
    let index = u16::from_be_bytes([frame.pdu.payload[0], frame.pdu.payload[1]]);
    (frame.sequence_number, index as usize)
}

#[derive(Debug, TypeGenerator)]
enum LossyOperation {
    Enqueue {
        #[generator(2..48)]
        len: usize,
    },
    Transmit,
    Receive {
        index: usize,
    },
    /// Loses one of the frames in flight
    DropFrame {
        index: usize,
    },
    /// Delivers one of the frames in flight and loses its ACK
    DropAck {
        index: usize,
    },
    /// Runs the earliest timer, frames still in flight are lost
    Tick,
}

/// Follows which packet each frame carries and what became of it
#[derive(Default)]
struct Ledger {
    packets_by_sequence_number: HashMap<u8, usize>,
    flushed: BTreeSet<usize>,
    acknowledged: BTreeSet<usize>,
    seen_events: usize,
}

impl Ledger {
    fn on_transmit(&mut self, frame: &[u8]) {
        let (sequence_number, index) = frame_packet(frame, Config::DEFAULT_HEADER_SIZE);
        self.packets_by_sequence_number.insert(sequence_number, index);
    }

    fn on_receive(&mut self, frame: &[u8]) {
        let (_, index) = frame_packet(frame, Config::DEFAULT_HEADER_SIZE);
        self.acknowledged.insert(index);
    }

    /// Sequence numbers are only reused once released, so flushes have to be
    /// mapped before the next transmission
    fn on_events(&mut self, link: &Link) {
        for (_, event) in &link.subscriber.events[self.seen_events..] {
            if let Event::ArqPduFlushed(event) = event {
                self.flushed
                    .insert(self.packets_by_sequence_number[&event.sequence_number]);
            }
        }
        self.seen_events = link.subscriber.events.len();
    }
}

/// Frames are delivered out of order, lost, retransmitted and flushed while
/// the receiver skips what it gave up waiting for
#[test]
fn lossy_link_delivery_test() {
    // beyond this many consecutive lost frames the receiver cannot tell a
    // retransmission from a new frame
    const MAX_PACKETS: usize = u8::MAX as usize + 1 - MAX_WINDOW_SIZE as usize;

    check!()
        .with_type::<(u8, u8, Vec<LossyOperation>)>()
        .for_each(|(window, max_retransmissions, operations)| {
            let window = window % MAX_WINDOW_SIZE + 1;
            let config = Config::new()
                .with_window_size(window)
                .unwrap()
                .with_max_retransmissions((max_retransmissions % 3) as u32)
                .unwrap();
            let mut link = Link::new(config);
            let mut ledger = Ledger::default();
            let mut enqueued: Vec<Bytes> = vec![];
            let mut in_flight: Vec<Bytes> = vec![];

            for operation in operations {
                match operation {
                    LossyOperation::Enqueue { len } => {
                        if enqueued.len() < MAX_PACKETS {
                            let packet = indexed_packet(enqueued.len(), *len);
                            link.enqueue(packet.clone());
                            enqueued.push(packet);
                        }
                    }
                    LossyOperation::Transmit => {
                        if let Some(frame) = link.transmit(64) {
                            ledger.on_transmit(&frame);
                            in_flight.push(frame);
                        }
                    }
                    LossyOperation::Receive { index } | LossyOperation::DropAck { index } => {
                        if !in_flight.is_empty() {
                            let frame = in_flight.remove(index % in_flight.len());
                            link.receive(&frame);
                            ledger.on_receive(&frame);
                            if matches!(operation, LossyOperation::Receive { .. }) {
                                link.forward_acks();
                            } else {
                                link.take_acks();
                            }
                        }
                    }
                    LossyOperation::DropFrame { index } => {
                        if !in_flight.is_empty() {
                            in_flight.remove(index % in_flight.len());
                        }
                    }
                    LossyOperation::Tick => {
                        in_flight.clear();
                        if link.sender.next_expiration().is_some()
                            || link.receiver.next_expiration().is_some()
                        {
                            link.tick();
                            link.forward_acks();
                        }
                    }
                }
                ledger.on_events(&link);

                assert!(link.sender.outstanding() <= window as usize);
            }

            for frame in core::mem::take(&mut in_flight) {
                link.receive(&frame);
                ledger.on_receive(&frame);
            }
            link.forward_acks();

            // frames lost earlier may still be flushed on the way
            loop {
                while let Some(frame) = link.transmit(64) {
                    ledger.on_transmit(&frame);
                    link.receive(&frame);
                    ledger.on_receive(&frame);
                    link.forward_acks();
                }
                if link.sender.next_expiration().is_none()
                    && link.receiver.next_expiration().is_none()
                {
                    break;
                }
                link.tick();
                link.forward_acks();
                ledger.on_events(&link);
            }

            assert_eq!(link.sender.tx_buffer_size_in_bytes(), 0);
            assert_eq!(link.sender.outstanding(), 0);
            assert_eq!(link.receiver.reordering_len(), 0);

            let delivered: Vec<usize> = link
                .delivered()
                .into_iter()
                .map(|packet| {
                    let index = u16::from_be_bytes([packet[0], packet[1]]) as usize;
                    assert_eq!(packet, enqueued[index]);
                    index
                })
                .collect();
            assert!(
                delivered.windows(2).all(|pair| pair[0] < pair[1]),
                "{delivered:?} is not in order"
            );

            // a full packet per frame keeps packet indices and continuous
            // sequence numbers equal
            let skipped = link.skipped();
            let is_skipped =
                |index: usize| skipped.iter().any(|range| range.contains(&(index as u32)));
            let delivered: BTreeSet<usize> = delivered.into_iter().collect();

            for index in 0..enqueued.len() {
                assert!(
                    delivered.contains(&index)
                        || ledger.flushed.contains(&index)
                        || is_skipped(index),
                    "packet {index} vanished"
                );
            }
            for index in &ledger.acknowledged {
                assert!(
                    delivered.contains(index) || is_skipped(*index),
                    "acknowledged packet {index} was discarded"
                );
            }
        });
}

#[derive(Debug, TypeGenerator)]
enum RetransmissionOperation {
    Transmit,
    Ack { index: usize },
    Expire,
}

#[test]
fn sequence_number_reuse_test() {
    check!()
        .with_type::<(u8, Vec<RetransmissionOperation>)>()
        .for_each(|(window, operations)| {
            let window = window % MAX_WINDOW_SIZE + 1;
            let config = Config::new().with_window_size(window).unwrap();
            let mut link = Link::new(config);
            let mut sent = vec![];

            for operation in operations {
                match operation {
                    RetransmissionOperation::Transmit => {
                        link.enqueue(packet(sent.len(), 8));
                        if let Some(frame) = link.transmit(100) {
                            sent.push(frame[0]);
                        }
                    }
                    RetransmissionOperation::Ack { index } => {
                        if !sent.is_empty() {
                            link.ack(sent[index % sent.len()]);
                        }
                    }
                    RetransmissionOperation::Expire => {
                        if let Some(next) = link.sender.next_expiration() {
                            link.now = next;
                            link.sender
                                .on_timeout(link.now, &mut link.subscriber)
                                .unwrap();
                        }
                    }
                }
                assert!(link.sender.outstanding() <= window as usize);
            }

            // without acknowledgements every frame is eventually flushed
            while let Some(next) = link.sender.next_expiration() {
                link.now = next;
                link.sender
                    .on_timeout(link.now, &mut link.subscriber)
                    .unwrap();
            }
            assert_eq!(link.sender.outstanding(), 0);

            let mut fresh = 0;
            let mut finished = 0;
            for event in link.events() {
                match event {
                    Event::ArqPduTransmitted(event) if !event.is_retransmission => fresh += 1,
                    Event::ArqAckReceived(event) if event.known => finished += 1,
                    Event::ArqPduFlushed(_) => finished += 1,
                    _ => {}
                }
            }
            assert_eq!(fresh, finished);

            // the whole window is available again
            for index in 0..window as usize {
                link.enqueue(packet(index, 8));
                assert!(link.transmit(100).is_some());
            }
        });
}
