// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Drives one terminal through a complete access cycle: demand estimation,
//! capacity request, admission, time slot generation and ARQ transmission

use bytes::Bytes;
use dama_core::{
    address::Address,
    arq,
    control::{Category, Message},
    event::{self, Meta},
    frame::{self, AllocationRequest, CcLevel, FrameAllocator, RcDemand, Tbtp, UtAllocInfoMap, Waveform},
    queue::Statistics,
    request::{self, RequestManager},
    service::{self, Service},
    superframe::{self, Allocation, SuperframeAllocator},
    time::{timer::Provider as _, Duration, Timestamp},
};
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

const TERMINAL: Address = Address::from_node_id(2);
const GATEWAY: Address = Address::from_node_id(1);
const SUPERFRAME: Duration = Duration::from_millis(100);
const PACKET_LEN: usize = 1000;

const WAVEFORM: Waveform = Waveform {
    id: 1,
    payload_bytes: 1100,
    burst_length_symbols: 500,
    cno_threshold: 40.0,
};

type Outbox = Rc<RefCell<Vec<(Message, Address)>>>;

fn outbox() -> (Outbox, impl FnMut(Message, Address)) {
    let outbox: Outbox = Default::default();
    let sink = outbox.clone();
    (outbox, move |message: Message, destination: Address| {
        // everything crosses the air interface in its wire format
        let message = Message::from_bytes(&message.to_bytes()).unwrap();
        sink.borrow_mut().push((message, destination));
    })
}

#[derive(Debug, Default)]
struct Recorder {
    requests: usize,
    allocations: Vec<event::TerminalAllocated>,
    transmissions: usize,
    reassembled: usize,
}

impl event::Subscriber for Recorder {
    fn on_capacity_request_sent(&mut self, _meta: &Meta, _event: &event::CapacityRequestSent) {
        self.requests += 1;
    }

    fn on_terminal_allocated(&mut self, _meta: &Meta, event: &event::TerminalAllocated) {
        self.allocations.push(event.clone());
    }

    fn on_arq_pdu_transmitted(&mut self, _meta: &Meta, _event: &event::ArqPduTransmitted) {
        self.transmissions += 1;
    }

    fn on_packet_reassembled(&mut self, _meta: &Meta, _event: &event::PacketReassembled) {
        self.reassembled += 1;
    }
}

#[test]
fn access_cycle_test() {
    let mut subscriber = Recorder::default();
    let clock = Rc::new(Cell::new(Timestamp::ZERO));

    // terminal
    let statistics = Rc::new(RefCell::new(Statistics::new(clock.get())));
    let services = service::Config::new(vec![Service::new().with_rbdc(true)]).unwrap();
    let mut manager =
        RequestManager::new(request::Config::default(), services, TERMINAL, clock.get()).unwrap();
    manager.set_gateway_address(GATEWAY);
    manager.on_cno_updated(55.0);
    let (to_gateway, sink) = outbox();
    manager.set_control_sink(sink);
    {
        let statistics = statistics.clone();
        let clock = clock.clone();
        manager.add_queue_provider(0, move |reset: bool| {
            statistics.borrow_mut().sample(clock.get(), reset)
        });
    }

    let mut uplink = arq::Encapsulator::new(arq::Config::default(), TERMINAL, GATEWAY, 0);
    uplink.set_control_sink(|_message: Message, _destination: Address| {});

    // gateway
    let mut downlink = arq::Encapsulator::new(arq::Config::default(), TERMINAL, GATEWAY, 0);
    let (to_terminal, sink) = outbox();
    downlink.set_control_sink(sink);

    let frame = FrameAllocator::new(frame::Config::new(0, 2, 10_000, vec![WAVEFORM]).unwrap());
    let mut allocator = SuperframeAllocator::new(superframe::Config::default(), vec![frame]).unwrap();

    let packets: Vec<Bytes> = (0..2u8)
        .map(|index| Bytes::from(vec![index; PACKET_LEN]))
        .collect();
    for packet in &packets {
        uplink.enqueue(packet.clone()).unwrap();
        statistics.borrow_mut().on_enqueue(PACKET_LEN as u32);
    }

    // the first evaluation turns the backlog into an RBDC request
    let now = manager.next_expiration().unwrap();
    assert_eq!(now, Timestamp::ZERO + SUPERFRAME);
    clock.set(now);
    manager.on_timeout(now, &mut subscriber).unwrap();

    let sent = core::mem::take(&mut *to_gateway.borrow_mut());
    assert_eq!(sent.len(), 1, "the capacity request replaces the C/N0 report");
    let (Message::CapacityRequest(request), destination) = &sent[0] else {
        panic!("expected a capacity request, got {sent:?}");
    };
    assert_eq!(*destination, GATEWAY);
    assert_eq!(request.cno_estimate(), Some(55.0));
    let element = request.elements()[0];
    assert_eq!(element.category, Category::Rbdc);
    // 2000 bytes in 100ms
    assert_eq!(element.value, 160);

    // admission and slot generation at the gateway
    let rbdc_bytes = (element.value as f64 * 1000.0 / 8.0 * SUPERFRAME.as_secs_f64()) as u32;
    let requests = [AllocationRequest::new(TERMINAL, 55.0).with_demand(
        0,
        RcDemand {
            rbdc_bytes,
            ..Default::default()
        },
    )];
    let outcomes = allocator.pre_allocate_symbols(&requests, now, &mut subscriber);
    assert_eq!(outcomes.len(), 1);
    assert_eq!(
        outcomes[0],
        Ok(Allocation {
            frame_id: 0,
            waveform_id: WAVEFORM.id,
            cc_level: CcLevel::CraRbdcVbdc,
        })
    );
    assert_eq!(subscriber.allocations.len(), 1);

    let mut tbtps = vec![Tbtp::new(1)];
    let mut ut_alloc = UtAllocInfoMap::new();
    allocator
        .generate_time_slots(&mut tbtps, 1024, &mut ut_alloc, now, &mut subscriber)
        .unwrap();
    let granted = ut_alloc[&TERMINAL].total_bytes();
    assert_eq!(granted, 2 * WAVEFORM.payload_bytes);
    manager.on_assigned_da_resources(0, granted);

    // the terminal fills its slots with ARQ frames
    let slots: Vec<_> = tbtps
        .iter()
        .flat_map(|tbtp| tbtp.slots_for(TERMINAL))
        .copied()
        .collect();
    assert_eq!(slots.len(), 2);

    for slot in slots {
        assert_eq!(slot.waveform_id, WAVEFORM.id);
        let frame = uplink
            .notify_tx_opportunity(WAVEFORM.payload_bytes as usize, now, &mut subscriber)
            .unwrap();
        statistics.borrow_mut().on_dequeue(frame.len() as u32);
        downlink
            .on_frame_received(&frame, now, &mut subscriber)
            .unwrap();
    }

    for (message, destination) in core::mem::take(&mut *to_terminal.borrow_mut()) {
        assert_eq!(destination, TERMINAL);
        let Message::ArqAck(ack) = message else {
            panic!("expected an ARQ ACK, got {message:?}");
        };
        uplink.on_ack(ack, now, &mut subscriber);
    }

    let delivered: Vec<_> = core::iter::from_fn(|| downlink.pop_delivered()).collect();
    assert_eq!(delivered, packets);
    assert_eq!(uplink.outstanding(), 0);
    assert_eq!(uplink.tx_buffer_size_in_bytes(), 0);
    assert_eq!(uplink.next_expiration(), None);
    assert_eq!(statistics.borrow().queue_size_bytes(), 0);

    assert_eq!(subscriber.requests, 1);
    assert_eq!(subscriber.transmissions, 2);
    assert_eq!(subscriber.reassembled, 2);
}
