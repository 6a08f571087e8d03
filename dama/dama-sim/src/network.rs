// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A deterministic virtual-time access network
//!
//! Terminals estimate their demand and send capacity requests, the gateway
//! admits them once per superframe and the granted slots carry ARQ frames over
//! a lossy return link. All components are driven by polling their timers at
//! the earliest expiration.

use crate::{scenario::Scenario, stats::Report, Result};
use anyhow::{anyhow, Context as _};
use bytes::Bytes;
use dama_core::{
    address::Address,
    arq::Encapsulator,
    control::{CapacityRequest, Category, Message},
    encapsulation::MAX_PACKET_BYTES,
    event,
    frame::{AllocationRequest, FrameAllocator, RcDemand, Tbtp, UtAllocInfoMap},
    queue::Statistics,
    request::RequestManager,
    service::{self, RcIndex},
    superframe::SuperframeAllocator,
    time::{
        testing as clock,
        timer::{self, Provider as _},
        Duration, Timestamp,
    },
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{cell::RefCell, collections::BTreeMap, rc::Rc};
use tracing::{debug, info, trace};

const GATEWAY: Address = Address::from_node_id(0);

type Outbox = Rc<RefCell<Vec<(Message, Address)>>>;

fn outbox() -> (Outbox, impl FnMut(Message, Address) + 'static) {
    let outbox: Outbox = Default::default();
    let sink = outbox.clone();
    (outbox, move |message: Message, destination: Address| {
        sink.borrow_mut().push((message, destination));
    })
}

/// Runs `scenario` with the given seed and returns its report
pub fn simulate(scenario: &Scenario, seed: u64) -> Result<Report> {
    clock::reset();
    let network = Network::new(scenario, seed)?;
    network.run()
}

/// Offered traffic of one request class
#[derive(Debug)]
struct Source {
    packet_bytes: usize,
    interval: Duration,
    next_arrival: Timestamp,
}

impl Source {
    fn jitter(&self, rng: &mut StdRng) -> Duration {
        self.interval
            .mul_f64(rng.gen_range(0.5..1.5))
            .max(Duration::from_micros(1))
    }

    fn packet_len(&self, rng: &mut StdRng) -> usize {
        let low = (self.packet_bytes / 2).max(1);
        let high = (self.packet_bytes * 3 / 2).max(low);
        rng.gen_range(low..=high).min(MAX_PACKET_BYTES)
    }
}

/// One ARQ protected flow between a terminal and the gateway
struct Flow {
    rc: RcIndex,
    statistics: Rc<RefCell<Statistics>>,
    uplink: Encapsulator,
    downlink: Encapsulator,
    acks: Outbox,
    source: Option<Source>,
}

impl Flow {
    /// Mirrors the ARQ backlog into the queue statistics sampled by the
    /// request manager
    fn sync_queue(&mut self, manager: &mut RequestManager) {
        let backlog = self.uplink.tx_buffer_size_in_bytes() as u32;
        let mut statistics = self.statistics.borrow_mut();
        let queued = statistics.queue_size_bytes();

        if backlog > queued {
            let event = statistics.on_enqueue(backlog - queued);
            manager.on_queue_event(event, self.rc);
        } else if backlog < queued {
            statistics.on_dequeue(queued - backlog);
        }
    }
}

struct Terminal {
    address: Address,
    control_slot: bool,
    services: service::Config,
    manager: RequestManager,
    outbox: Outbox,
    flows: Vec<Flow>,
}

/// Demand the gateway holds for one request class of a terminal
#[derive(Clone, Debug, Default)]
struct Demand {
    rbdc_kbps: u32,
    vbdc_bytes: u32,
}

struct Gateway {
    allocator: SuperframeAllocator,
    demand: BTreeMap<Address, Vec<Demand>>,
    cno: BTreeMap<Address, f64>,
    superframe_counter: u32,
}

impl Gateway {
    fn on_capacity_request(&mut self, terminal: Address, request: &CapacityRequest) {
        if let Some(cno) = request.cno_estimate() {
            self.cno.insert(terminal, cno);
        }

        let demand = self.demand.entry(terminal).or_default();
        for element in request.elements() {
            let rc = element.rc as usize;
            if demand.len() <= rc {
                demand.resize_with(rc + 1, Default::default);
            }
            let entry = &mut demand[rc];
            match element.category {
                Category::Rbdc => entry.rbdc_kbps = element.value,
                Category::Vbdc => {
                    entry.vbdc_bytes = entry
                        .vbdc_bytes
                        .saturating_add(element.value.saturating_mul(1000))
                }
                Category::Avbdc => entry.vbdc_bytes = element.value.saturating_mul(1000),
                Category::Cra => {}
            }
        }
    }

    fn demand(&self, terminal: Address, rc: RcIndex) -> Demand {
        self.demand
            .get(&terminal)
            .and_then(|demand| demand.get(rc as usize))
            .cloned()
            .unwrap_or_default()
    }

    /// Payload of a slot, zero for slots of unknown frames or waveforms
    fn payload_bytes(&self, frame_id: u8, waveform_id: u32) -> u32 {
        self.allocator
            .frames()
            .iter()
            .find(|frame| frame.config().id() == frame_id)
            .and_then(|frame| frame.config().waveform(waveform_id))
            .map_or(0, |waveform| waveform.payload_bytes)
    }
}

struct Network {
    terminals: Vec<Terminal>,
    gateway: Gateway,
    rng: StdRng,
    events: (Report, event::tracing::Subscriber),
    superframe: Duration,
    tbtp_max_bytes: usize,
    rc_based: bool,
    frame_loss: f64,
    ack_loss: f64,
    now: Timestamp,
    next_superframe: Timestamp,
    end: Timestamp,
}

impl Network {
    fn new(scenario: &Scenario, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let now = Timestamp::ZERO;

        let frames: Vec<_> = scenario
            .frame_configs()?
            .into_iter()
            .map(FrameAllocator::new)
            .collect();
        let allocator = SuperframeAllocator::new(scenario.superframe_config()?, frames)?;
        let mut gateway = Gateway {
            allocator,
            demand: BTreeMap::new(),
            cno: BTreeMap::new(),
            superframe_counter: 0,
        };

        let request_config = scenario.request_config()?;
        let arq_config = scenario.arq_config()?;
        let mut terminals = vec![];

        for terminal in &scenario.terminals {
            let services = terminal.services()?;

            for _ in 0..terminal.count {
                let address = Address::from_node_id(terminals.len() as u32 + 1);

                let mut manager =
                    RequestManager::new(request_config, services.clone(), address, now)
                        .with_context(|| format!("invalid terminal {address}"))?;
                manager.set_gateway_address(GATEWAY);
                manager.on_cno_updated(terminal.cno);
                let (outbox, sink) = outbox();
                manager.set_control_sink(sink);

                let mut flows = vec![];
                for (rc, class) in terminal.classes.iter().enumerate() {
                    let rc = rc as RcIndex;
                    let statistics = Rc::new(RefCell::new(Statistics::new(now)));
                    {
                        let statistics = statistics.clone();
                        manager.add_queue_provider(rc, move |reset: bool| {
                            statistics.borrow_mut().sample(clock::now(), reset)
                        });
                    }

                    let mut uplink = Encapsulator::new(arq_config, address, GATEWAY, rc);
                    uplink.set_control_sink(|_message: Message, _destination: Address| {});
                    let mut downlink = Encapsulator::new(arq_config, address, GATEWAY, rc);
                    let (acks, sink) = self::outbox();
                    downlink.set_control_sink(sink);

                    let source = class.packet_interval.map(|interval| {
                        let mut source = Source {
                            packet_bytes: class.packet_bytes,
                            interval,
                            next_arrival: now,
                        };
                        source.next_arrival = now + source.jitter(&mut rng);
                        source
                    });

                    flows.push(Flow {
                        rc,
                        statistics,
                        uplink,
                        downlink,
                        acks,
                        source,
                    });
                }

                let minimum_bytes: u32 = services
                    .iter()
                    .map(|(_, service)| {
                        kbps_to_bytes(
                            service.constant_rate_kbps() + service.minimum_rate_kbps(),
                            scenario.superframe,
                        )
                    })
                    .sum();
                if minimum_bytes > 0 || terminal.control_slot {
                    gateway
                        .allocator
                        .reserve_minimum_rate(minimum_bytes, terminal.control_slot)
                        .with_context(|| format!("terminal {address} can not be admitted"))?;
                }

                terminals.push(Terminal {
                    address,
                    control_slot: terminal.control_slot,
                    services: services.clone(),
                    manager,
                    outbox,
                    flows,
                });
            }
        }

        info!(
            terminals = terminals.len(),
            frames = scenario.frames.len(),
            seed,
            "network created"
        );

        Ok(Self {
            terminals,
            gateway,
            rng,
            events: (
                Report {
                    seed,
                    ..Default::default()
                },
                Default::default(),
            ),
            superframe: scenario.superframe,
            tbtp_max_bytes: scenario.tbtp_max_bytes,
            rc_based: scenario.allocation.rc_based,
            frame_loss: scenario.arq.frame_loss,
            ack_loss: scenario.arq.ack_loss,
            now,
            next_superframe: now + scenario.superframe,
            end: now + scenario.duration,
        })
    }

    fn run(mut self) -> Result<Report> {
        loop {
            let now = self.next_event();
            if now > self.end {
                break;
            }

            self.now = now;
            clock::advance_to(now);

            self.on_arrivals();
            self.on_timeout()?;
            self.deliver_control()?;

            if now >= self.next_superframe {
                self.on_superframe()?;
                self.next_superframe += self.superframe;
            }

            self.deliver_acks();
        }

        let report = self.events.0;
        info!(
            delivered = report.arq.delivered_packets,
            offered = report.offered_packets,
            "simulation finished"
        );
        Ok(report)
    }

    fn next_event(&self) -> Timestamp {
        let mut next = self.manager_expirations();

        for flow in self.terminals.iter().flat_map(|t| t.flows.iter()) {
            next = timer::earliest(next, flow.uplink.next_expiration());
            next = timer::earliest(next, flow.downlink.next_expiration());
            next = timer::earliest(next, flow.source.as_ref().map(|s| s.next_arrival));
        }

        next.map_or(self.next_superframe, |next| next.min(self.next_superframe))
    }

    fn manager_expirations(&self) -> Option<Timestamp> {
        self.terminals
            .iter()
            .map(|terminal| terminal.manager.next_expiration())
            .fold(None, timer::earliest)
    }

    fn on_arrivals(&mut self) {
        let now = self.now;

        for terminal in &mut self.terminals {
            for flow in &mut terminal.flows {
                let Some(source) = flow.source.as_mut() else {
                    continue;
                };

                while source.next_arrival <= now {
                    let len = source.packet_len(&mut self.rng);
                    let packet = Bytes::from(vec![flow.rc; len]);
                    match flow.uplink.enqueue(packet) {
                        Ok(()) => {
                            self.events.0.offered_packets += 1;
                            self.events.0.offered_bytes += len as u64;
                        }
                        Err(error) => debug!(%error, "packet rejected"),
                    }
                    source.next_arrival += source.jitter(&mut self.rng);
                }

                flow.sync_queue(&mut terminal.manager);
            }
        }
    }

    fn on_timeout(&mut self) -> Result {
        let now = self.now;

        for terminal in &mut self.terminals {
            for flow in &mut terminal.flows {
                flow.uplink.on_timeout(now, &mut self.events)?;
                flow.downlink.on_timeout(now, &mut self.events)?;
                flow.sync_queue(&mut terminal.manager);
            }

            terminal.manager.on_timeout(now, &mut self.events)?;
        }

        Ok(())
    }

    fn deliver_control(&mut self) -> Result {
        for terminal in &self.terminals {
            for (message, destination) in terminal.outbox.borrow_mut().drain(..) {
                if destination != GATEWAY {
                    return Err(anyhow!("{} sent {message:?} to {destination}", terminal.address));
                }

                match message {
                    Message::CapacityRequest(request) => {
                        trace!(terminal = %terminal.address, ?request, "capacity request received");
                        self.gateway.on_capacity_request(terminal.address, &request);
                    }
                    Message::CnoReport(report) => {
                        if let Some(cno) = report.cno_estimate {
                            self.gateway.cno.insert(terminal.address, cno);
                        }
                    }
                    Message::ArqAck(_) => {
                        return Err(anyhow!("unexpected ARQ ACK from {}", terminal.address));
                    }
                }
            }
        }

        Ok(())
    }

    fn on_superframe(&mut self) -> Result {
        let now = self.now;
        let superframe = self.superframe;

        let requests: Vec<_> = self
            .terminals
            .iter()
            .filter_map(|terminal| {
                // nothing is known about the terminal before its first report
                let cno = *self.gateway.cno.get(&terminal.address)?;
                let mut request = AllocationRequest::new(terminal.address, cno)
                    .with_control_slot(terminal.control_slot);

                for (rc, service) in terminal.services.iter() {
                    let demand = self.gateway.demand(terminal.address, rc);
                    let rbdc_bytes = kbps_to_bytes(demand.rbdc_kbps, superframe);
                    request = request.with_demand(
                        rc,
                        RcDemand {
                            cra_bytes: kbps_to_bytes(service.constant_rate_kbps(), superframe),
                            min_rbdc_bytes: kbps_to_bytes(service.minimum_rate_kbps(), superframe)
                                .min(rbdc_bytes),
                            rbdc_bytes,
                            vbdc_bytes: demand.vbdc_bytes,
                        },
                    );
                }

                Some(request)
            })
            .collect();

        let outcomes =
            self.gateway
                .allocator
                .pre_allocate_symbols(&requests, now, &mut self.events);
        let admitted = outcomes.iter().filter(|outcome| outcome.is_ok()).count();

        let mut tbtps = vec![Tbtp::new(self.gateway.superframe_counter)];
        let mut ut_alloc = UtAllocInfoMap::new();
        self.gateway.allocator.generate_time_slots(
            &mut tbtps,
            self.tbtp_max_bytes,
            &mut ut_alloc,
            now,
            &mut self.events,
        )?;
        self.gateway.superframe_counter = self.gateway.superframe_counter.wrapping_add(1);

        debug!(
            counter = self.gateway.superframe_counter,
            tbtps = tbtps.len(),
            requests = requests.len(),
            admitted,
            "superframe allocated"
        );

        for terminal in &mut self.terminals {
            let Some(info) = ut_alloc.get(&terminal.address) else {
                continue;
            };

            for (rc, bytes) in info.bytes_per_rc.iter().enumerate() {
                terminal.manager.on_assigned_da_resources(rc as RcIndex, *bytes);
                self.events.0.allocation.granted_bytes += *bytes as u64;
                if let Some(demand) = self
                    .gateway
                    .demand
                    .get_mut(&terminal.address)
                    .and_then(|demand| demand.get_mut(rc))
                {
                    demand.vbdc_bytes = demand.vbdc_bytes.saturating_sub(*bytes);
                }
            }

            let slots: Vec<_> = tbtps
                .iter()
                .flat_map(|tbtp| tbtp.slots_for(terminal.address))
                .filter(|slot| !slot.control)
                .map(|slot| {
                    let payload = self.gateway.payload_bytes(slot.frame_id, slot.waveform_id);
                    (slot.rc_index, payload as usize)
                })
                .collect();

            for (rc, payload) in slots {
                // without rc based allocation any flow with data may use the slot
                let rc_based = self.rc_based;
                let events = &mut self.events;
                let sent = terminal
                    .flows
                    .iter_mut()
                    .filter(|flow| !rc_based || flow.rc == rc)
                    .find_map(|flow| {
                        let frame = flow.uplink.notify_tx_opportunity(payload, now, events)?;
                        Some((flow, frame))
                    });
                let Some((flow, frame)) = sent else {
                    continue;
                };
                flow.sync_queue(&mut terminal.manager);

                if self.rng.gen_bool(self.frame_loss) {
                    trace!(terminal = %terminal.address, rc = flow.rc, "frame lost");
                    self.events.0.arq.lost_frames += 1;
                    continue;
                }

                flow.downlink
                    .on_frame_received(&frame, now, &mut self.events)?;
            }
        }

        Ok(())
    }

    fn deliver_acks(&mut self) {
        let now = self.now;

        for flow in self.terminals.iter_mut().flat_map(|t| t.flows.iter_mut()) {
            let acks = core::mem::take(&mut *flow.acks.borrow_mut());
            for (message, _destination) in acks {
                let Message::ArqAck(ack) = message else {
                    continue;
                };

                if self.rng.gen_bool(self.ack_loss) {
                    self.events.0.arq.lost_acks += 1;
                    continue;
                }

                flow.uplink.on_ack(ack, now, &mut self.events);
            }

            // delivered packets are only accounted for through events
            while flow.downlink.pop_delivered().is_some() {}
        }
    }
}

fn kbps_to_bytes(kbps: u32, superframe: Duration) -> u32 {
    (kbps as f64 * 1000.0 / 8.0 * superframe.as_secs_f64()).ceil() as u32
}
