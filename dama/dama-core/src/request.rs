// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per request class demand estimation and capacity request generation
//!
//! Once per evaluation interval the [`RequestManager`] samples the queue of
//! every request class, runs the rate based (RBDC) or volume based (VBDC)
//! estimator configured for the class and sends a single capacity request
//! towards the gateway. A periodic C/N0 report is sent in between, unless a
//! capacity request already carried the estimate.

use crate::{
    address::Address,
    control::{self, CapacityRequest, Category, CnoReport},
    error::Kind,
    event::{self, Meta},
    queue,
    service::{self, RcIndex, Service},
    time::{
        timer::{self, Timer},
        Timestamp,
    },
    Result,
};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, trace};

mod config;

pub use config::Config;

/// The estimator used for a request class
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Estimator {
    Rbdc,
    Vbdc,
    None,
}

impl Estimator {
    fn new(rc: RcIndex, service: &Service) -> Result<Self> {
        match (service.rbdc_allowed(), service.volume_allowed()) {
            (true, false) => Ok(Self::Rbdc),
            (false, true) => Ok(Self::Vbdc),
            (true, true) => Err(Kind::SimultaneousRbdcVbdc { rc }.err()),
            (false, false) => Ok(Self::None),
        }
    }
}

/// Request bookkeeping of a single request class
#[derive(Debug, Default)]
struct ClassState {
    /// Quantized RBDC requests of the last round trip, oldest first
    pending_rbdc_kbps: VecDeque<u32>,
    /// Requested VBDC bytes not yet granted
    pending_vbdc_bytes: u32,
    /// Bytes granted by TBTPs since the last evaluation
    assigned_bytes: u32,
    /// Backlog volume observed since the last absolute request
    sum_vbdc_volume_in: u32,
}

impl ClassState {
    #[inline]
    fn pending_rbdc_sum_kbps(&self) -> u32 {
        self.pending_rbdc_kbps.iter().sum()
    }

    fn push_rbdc(&mut self, value: u32, max_entries: usize) {
        self.pending_rbdc_kbps.push_back(value);
        while self.pending_rbdc_kbps.len() > max_entries {
            self.pending_rbdc_kbps.pop_front();
        }
    }

    /// Removes the granted bytes from the pending request
    fn reconcile_vbdc(&mut self) {
        self.pending_vbdc_bytes = self.pending_vbdc_bytes.saturating_sub(self.assigned_bytes);
        self.assigned_bytes = 0;
    }

    fn reset_vbdc(&mut self) {
        self.assigned_bytes = 0;
        self.pending_vbdc_bytes = 0;
        self.sum_vbdc_volume_in = 0;
    }
}

pub struct RequestManager {
    config: Config,
    services: service::Config,
    estimators: Vec<Estimator>,
    classes: Vec<ClassState>,
    queues: BTreeMap<RcIndex, Box<dyn queue::Provider>>,
    control_sink: Option<Box<dyn control::Sink>>,
    address: Address,
    gw_address: Address,
    last_cno: Option<f64>,
    evaluation_timer: Timer,
    cno_report_timer: Timer,
}

impl core::fmt::Debug for RequestManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RequestManager")
            .field("address", &self.address)
            .field("gw_address", &self.gw_address)
            .field("classes", &self.classes)
            .field("last_cno", &self.last_cno)
            .field("evaluation_timer", &self.evaluation_timer)
            .field("cno_report_timer", &self.cno_report_timer)
            .finish()
    }
}

impl RequestManager {
    /// Creates a request manager for the terminal at `address`
    ///
    /// The first evaluation and the first C/N0 report are scheduled one
    /// interval after `now`.
    pub fn new(
        config: Config,
        services: service::Config,
        address: Address,
        now: Timestamp,
    ) -> Result<Self> {
        config.validate()?;

        let estimators = services
            .iter()
            .map(|(rc, service)| Estimator::new(rc, service))
            .collect::<Result<Vec<_>>>()?;
        let classes = estimators.iter().map(|_| ClassState::default()).collect();

        debug!(
            %address,
            gain = config.gain(),
            max_pending_entries = config.max_pending_entries(),
            "request manager initialized"
        );

        let mut manager = Self {
            config,
            services,
            estimators,
            classes,
            queues: Default::default(),
            control_sink: None,
            address,
            gw_address: Address::BROADCAST,
            last_cno: None,
            evaluation_timer: Timer::default(),
            cno_report_timer: Timer::default(),
        };
        manager
            .evaluation_timer
            .set(now + manager.config.evaluation_interval);
        manager
            .cno_report_timer
            .set(now + manager.config.cno_report_interval);

        Ok(manager)
    }

    /// Registers the statistics source of the `rc` queue
    pub fn add_queue_provider<P: queue::Provider + 'static>(&mut self, rc: RcIndex, provider: P) {
        self.queues.insert(rc, Box::new(provider));
    }

    /// Registers the sink receiving capacity requests and C/N0 reports
    pub fn set_control_sink<S: control::Sink + 'static>(&mut self, sink: S) {
        self.control_sink = Some(Box::new(sink));
    }

    pub fn set_gateway_address(&mut self, address: Address) {
        self.gw_address = address;
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stores the latest C/N0 estimate of the forward link, in dBHz
    pub fn on_cno_updated(&mut self, cno: f64) {
        trace!(address = %self.address, cno, "C/N0 updated");
        self.last_cno = Some(cno);
    }

    /// Accounts for bytes granted to `rc` by a TBTP since the last evaluation
    pub fn on_assigned_da_resources(&mut self, rc: RcIndex, bytes: u32) {
        trace!(address = %self.address, rc, bytes, "TBTP resources assigned");
        if let Some(class) = self.classes.get_mut(rc as usize) {
            class.assigned_bytes = class.assigned_bytes.saturating_add(bytes);
        }
    }

    /// Forgets all outstanding VBDC requests, e.g. after the gateway lost them
    pub fn resynchronize_vbdc(&mut self) {
        debug!(address = %self.address, "VBDC resynchronized");
        for class in &mut self.classes {
            class.reset_vbdc();
        }
    }

    /// Handles a notification from the `rc` queue
    ///
    /// Evaluation only runs periodically: the estimators assume a constant
    /// sampling interval, so queue events are logged and otherwise ignored.
    pub fn on_queue_event(&mut self, event: queue::Event, rc: RcIndex) {
        match event {
            queue::Event::FirstBufferedPacket => {
                trace!(address = %self.address, rc, "first buffered packet")
            }
            queue::Event::BufferedPacket => {
                trace!(address = %self.address, rc, "buffered packet")
            }
        }
    }

    /// Number of quantized RBDC requests still considered pending for `rc`
    #[inline]
    pub fn pending_rbdc_len(&self, rc: RcIndex) -> usize {
        self.classes
            .get(rc as usize)
            .map_or(0, |class| class.pending_rbdc_kbps.len())
    }

    /// Sum of the RBDC rates still considered pending for `rc`
    #[inline]
    pub fn pending_rbdc_sum_kbps(&self, rc: RcIndex) -> u32 {
        self.classes
            .get(rc as usize)
            .map_or(0, ClassState::pending_rbdc_sum_kbps)
    }

    /// Requested VBDC bytes of `rc` not yet granted
    #[inline]
    pub fn pending_vbdc_bytes(&self, rc: RcIndex) -> u32 {
        self.classes
            .get(rc as usize)
            .map_or(0, |class| class.pending_vbdc_bytes)
    }

    /// Runs the evaluation and C/N0 report timers that expired at `now`
    pub fn on_timeout<Sub: event::Subscriber>(
        &mut self,
        now: Timestamp,
        subscriber: &mut Sub,
    ) -> Result {
        if self.evaluation_timer.poll_expiration(now).is_ready() {
            self.evaluation_timer
                .set(now + self.config.evaluation_interval);
            self.evaluate(now, subscriber)?;
        }

        if self.cno_report_timer.poll_expiration(now).is_ready() {
            self.send_cno_report(now, subscriber)?;
        }

        Ok(())
    }

    fn evaluate<Sub: event::Subscriber>(&mut self, now: Timestamp, subscriber: &mut Sub) -> Result {
        debug!(address = %self.address, %now, "request manager evaluation started");

        // Evaluation is only ever periodic, which always starts a new sampling
        // interval at the queues.
        let reset = true;

        let mut request = CapacityRequest::default();
        let meta = Meta::new(now);

        for (rc, service) in self.services.iter() {
            let stats = self
                .queues
                .get_mut(&rc)
                .ok_or_else(|| Kind::MissingQueueProvider { rc }.err())?
                .stats(reset);

            trace!(
                rc,
                incoming_rate_kbps = stats.incoming_rate_kbps,
                outgoing_rate_kbps = stats.outgoing_rate_kbps,
                volume_in_bytes = stats.volume_in_bytes,
                volume_out_bytes = stats.volume_out_bytes,
                queue_size_bytes = stats.queue_size_bytes,
                "evaluating request class"
            );

            let class = &mut self.classes[rc as usize];

            match self.estimators[rc as usize] {
                Estimator::Rbdc => {
                    let rate_kbps = rbdc(&self.config, service, class, &stats);
                    debug!(rc, rate_kbps, "RBDC requested");

                    if rate_kbps > 0 {
                        subscriber.on_rbdc_requested(
                            &meta,
                            &event::RbdcRequested {
                                source: self.address,
                                rc,
                                rate_kbps,
                                queue_size_bytes: stats.queue_size_bytes,
                            },
                        );
                    }

                    request.add_control_element(rc, Category::Rbdc, rate_kbps);
                }
                Estimator::Vbdc => {
                    let (category, volume_kbytes) = vbdc(&self.config, service, class, &stats);
                    debug!(rc, volume_kbytes, %category, "VBDC requested");

                    if volume_kbytes > 0 {
                        subscriber.on_vbdc_requested(
                            &meta,
                            &event::VbdcRequested {
                                source: self.address,
                                rc,
                                category,
                                volume_kbytes,
                                queue_size_bytes: stats.queue_size_bytes,
                            },
                        );
                    }

                    request.add_control_element(rc, category, volume_kbytes);
                }
                Estimator::None => {
                    trace!(rc, "neither RBDC nor VBDC configured");
                }
            }
        }

        if request.has_non_zero_content() {
            self.send_capacity_request(now, request, subscriber)?;
        }

        for class in &mut self.classes {
            class.assigned_bytes = 0;
        }

        debug!(address = %self.address, "request manager evaluation finished");

        Ok(())
    }

    fn send_capacity_request<Sub: event::Subscriber>(
        &mut self,
        now: Timestamp,
        mut request: CapacityRequest,
        subscriber: &mut Sub,
    ) -> Result {
        // the capacity request carries the C/N0 estimate of the next report
        self.cno_report_timer.cancel();

        let sink = self
            .control_sink
            .as_mut()
            .ok_or_else(|| Kind::MissingControlSink.err())?;

        request.set_cno_estimate(self.last_cno);

        debug!(destination = %self.gw_address, "sending capacity request");
        subscriber.on_capacity_request_sent(
            &Meta::new(now),
            &event::CapacityRequestSent {
                source: self.address,
                destination: self.gw_address,
                elements: request.elements().to_vec(),
                cno_estimate: self.last_cno,
            },
        );

        sink.send(request.into(), self.gw_address);

        self.cno_report_timer
            .set(now + self.config.cno_report_interval);

        Ok(())
    }

    fn send_cno_report<Sub: event::Subscriber>(
        &mut self,
        now: Timestamp,
        subscriber: &mut Sub,
    ) -> Result {
        let sink = self
            .control_sink
            .as_mut()
            .ok_or_else(|| Kind::MissingControlSink.err())?;

        debug!(destination = %self.gw_address, "sending C/N0 report");
        subscriber.on_cno_report_sent(
            &Meta::new(now),
            &event::CnoReportSent {
                source: self.address,
                destination: self.gw_address,
                cno_estimate: self.last_cno,
            },
        );

        sink.send(
            CnoReport {
                cno_estimate: self.last_cno,
            }
            .into(),
            self.gw_address,
        );

        self.cno_report_timer
            .set(now + self.config.cno_report_interval);

        Ok(())
    }
}

impl timer::Provider for RequestManager {
    #[inline]
    fn next_expiration(&self) -> Option<Timestamp> {
        timer::earliest(
            self.evaluation_timer.expiration(),
            self.cno_report_timer.expiration(),
        )
    }
}

/// Computes the quantized RBDC rate in kbps and records it as pending
fn rbdc(config: &Config, service: &Service, class: &mut ClassState, stats: &queue::Stats) -> u32 {
    let interval = config.evaluation_interval.as_secs_f64();
    let coefficient = config.gain() / interval;

    let this_kbits = stats.incoming_rate_kbps * interval;
    let pending_kbits = class.pending_rbdc_sum_kbps() as f64 * interval;
    let backlog_kbits = 8.0 * stats.queue_size_bytes as f64 / 1000.0;

    let mut rate_kbps = stats.incoming_rate_kbps;
    let covered_kbits = this_kbits + pending_kbits;
    if backlog_kbits > covered_kbits {
        rate_kbps += coefficient * (backlog_kbits - covered_kbits);
    }

    trace!(rate_kbps, "raw RBDC rate");

    let quantization = service.rbdc_quantization();
    let max_kbps = service.maximum_rate_kbps() as f64;

    let quantized = if service.constant_assignment_provided() {
        let cra_kbps = service.constant_rate_kbps() as f64;
        let headroom_kbps = max_kbps - cra_kbps;

        let request_kbps = if rate_kbps <= cra_kbps {
            0.0
        } else {
            (rate_kbps - cra_kbps).min(headroom_kbps)
        };

        let quantized = quantization.ceil(request_kbps);
        if quantized as f64 > headroom_kbps {
            quantization.floor(headroom_kbps)
        } else {
            quantized
        }
    } else {
        let quantized = quantization.ceil(rate_kbps.min(max_kbps));
        if quantized as f64 > max_kbps {
            quantization.floor(max_kbps)
        } else {
            quantized
        }
    };

    class.push_rbdc(quantized, config.max_pending_entries());

    quantized
}

/// Bytes the CRA of the class provides over one evaluation interval
#[inline]
fn cra_bytes(config: &Config, service: &Service) -> u32 {
    (1000.0 * service.constant_rate_kbps() as f64 * config.evaluation_interval.as_secs_f64() / 8.0)
        as u32
}

#[inline]
fn to_kbytes(bytes: u32) -> f64 {
    (bytes as f64 / 1000.0).ceil()
}

/// Computes the VBDC or AVBDC request in KBytes and updates the pending volume
fn vbdc(
    config: &Config,
    service: &Service,
    class: &mut ClassState,
    stats: &queue::Stats,
) -> (Category, u32) {
    class.reconcile_vbdc();

    if stats.volume_in_bytes == 0 {
        return (Category::Avbdc, 0);
    }

    let cra_bytes = cra_bytes(config, service);
    let quantization = service.vbdc_quantization();

    if class.pending_vbdc_bytes == 0 {
        // everything requested so far was granted, so request the whole queue
        class.reset_vbdc();

        let bytes = stats.queue_size_bytes;
        ensure!(cra_bytes < bytes, (Category::Avbdc, 0));

        let kbytes = quantization.ceil(to_kbytes(bytes - cra_bytes));
        class.pending_vbdc_bytes = class
            .pending_vbdc_bytes
            .saturating_add(kbytes.saturating_mul(1000));

        trace!(pending_vbdc_bytes = class.pending_vbdc_bytes, "AVBDC");
        return (Category::Avbdc, kbytes);
    }

    let bytes = stats.volume_in_bytes;
    ensure!(cra_bytes < bytes, (Category::Vbdc, 0));

    class.sum_vbdc_volume_in = class.sum_vbdc_volume_in.saturating_add(bytes - cra_bytes);

    let mut kbytes = 0;
    if class.pending_vbdc_bytes < class.sum_vbdc_volume_in {
        kbytes = quantization.ceil(to_kbytes(
            class.sum_vbdc_volume_in - class.pending_vbdc_bytes,
        ));
        class.pending_vbdc_bytes = class
            .pending_vbdc_bytes
            .saturating_add(kbytes.saturating_mul(1000));
    }

    trace!(
        sum_vbdc_volume_in = class.sum_vbdc_volume_in,
        pending_vbdc_bytes = class.pending_vbdc_bytes,
        "VBDC"
    );

    (Category::Vbdc, kbytes)
}
