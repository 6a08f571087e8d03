// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! TOML description of a simulated access network

use crate::Result;
use anyhow::{ensure, Context};
use core::time::Duration;
use dama_core::{arq, frame, request, service, superframe};
use serde::{Deserialize, Deserializer};
use std::{fs, path::Path};

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Simulated time
    #[serde(deserialize_with = "duration")]
    pub duration: Duration,
    #[serde(deserialize_with = "duration", default = "default_superframe")]
    pub superframe: Duration,
    #[serde(default = "default_tbtp_max_bytes")]
    pub tbtp_max_bytes: usize,
    #[serde(default)]
    pub allocation: Allocation,
    #[serde(default)]
    pub request: Request,
    #[serde(default)]
    pub arq: Arq,
    pub frames: Vec<Frame>,
    pub terminals: Vec<Terminal>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Allocation {
    pub target_load: f64,
    pub fca: bool,
    pub rc_based: bool,
}

impl Default for Allocation {
    fn default() -> Self {
        let config = superframe::Config::default();
        Self {
            target_load: config.target_load(),
            fca: config.fca_enabled(),
            rc_based: config.rc_based_allocation_enabled(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Request {
    #[serde(deserialize_with = "duration")]
    pub evaluation_interval: Duration,
    #[serde(deserialize_with = "duration")]
    pub cno_report_interval: Duration,
    #[serde(deserialize_with = "duration")]
    pub rtt_estimate: Duration,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            evaluation_interval: request::Config::DEFAULT_EVALUATION_INTERVAL,
            cno_report_interval: request::Config::DEFAULT_CNO_REPORT_INTERVAL,
            rtt_estimate: request::Config::DEFAULT_RTT_ESTIMATE,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Arq {
    pub max_retransmissions: u32,
    #[serde(deserialize_with = "duration")]
    pub retransmission_timer: Duration,
    pub window_size: u8,
    pub header_size: usize,
    #[serde(deserialize_with = "duration")]
    pub rx_waiting_timer: Duration,
    /// Probability of losing a frame on the return link
    pub frame_loss: f64,
    /// Probability of losing an acknowledgement on the forward link
    pub ack_loss: f64,
}

impl Default for Arq {
    fn default() -> Self {
        Self {
            max_retransmissions: arq::Config::DEFAULT_MAX_RETRANSMISSIONS,
            retransmission_timer: arq::Config::DEFAULT_RETRANSMISSION_TIMER,
            window_size: arq::Config::DEFAULT_WINDOW_SIZE,
            header_size: arq::Config::DEFAULT_HEADER_SIZE,
            rx_waiting_timer: arq::Config::DEFAULT_RX_WAITING_TIMER,
            frame_loss: 0.0,
            ack_loss: 0.0,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Frame {
    pub carriers: u32,
    pub symbols_per_carrier: u32,
    pub waveforms: Vec<Waveform>,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Waveform {
    pub id: u32,
    pub payload_bytes: u32,
    pub burst_length_symbols: u32,
    /// Minimum C/N0 in dBHz
    pub cno_threshold: f64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Terminal {
    /// Number of identical terminals
    #[serde(default = "default_count")]
    pub count: u32,
    /// C/N0 of the terminal's return link in dBHz
    pub cno: f64,
    #[serde(default)]
    pub control_slot: bool,
    pub classes: Vec<Class>,
}

/// One request class of a terminal and the traffic offered to it
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Class {
    pub rbdc: bool,
    pub volume: bool,
    pub constant_assignment: bool,
    pub constant_rate_kbps: u32,
    pub maximum_rate_kbps: Option<u32>,
    pub minimum_rate_kbps: u32,
    pub packet_bytes: usize,
    /// Mean time between packets, no traffic when absent
    #[serde(deserialize_with = "optional_duration")]
    pub packet_interval: Option<Duration>,
}

fn default_superframe() -> Duration {
    Duration::from_millis(100)
}

fn default_tbtp_max_bytes() -> usize {
    1024
}

fn default_count() -> u32 {
    1
}

fn duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let value = String::deserialize(deserializer)?;
    humantime::parse_duration(&value).map_err(serde::de::Error::custom)
}

fn optional_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    value
        .map(|value| humantime::parse_duration(&value).map_err(serde::de::Error::custom))
        .transpose()
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("could not read scenario {}", path.display()))?;
        let scenario = Self::parse(&contents)
            .with_context(|| format!("invalid scenario {}", path.display()))?;
        Ok(scenario)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let scenario: Self = toml::from_str(contents)?;
        scenario.validate()?;
        Ok(scenario)
    }

    fn validate(&self) -> Result {
        ensure!(!self.duration.is_zero(), "duration must be non-zero");
        ensure!(!self.superframe.is_zero(), "superframe must be non-zero");
        ensure!(!self.frames.is_empty(), "at least one frame is required");
        ensure!(
            (0.0..=1.0).contains(&self.arq.frame_loss) && (0.0..=1.0).contains(&self.arq.ack_loss),
            "loss probabilities must be within 0..=1"
        );
        ensure!(
            self.frames.len() <= u8::MAX as usize + 1,
            "at most 256 frames are supported"
        );

        for (index, terminal) in self.terminals.iter().enumerate() {
            ensure!(
                terminal.classes.len() <= u8::MAX as usize + 1,
                "terminal {index} has more than 256 request classes"
            );
            for class in &terminal.classes {
                ensure!(
                    class.packet_interval.is_none() || class.packet_bytes > 0,
                    "terminal {index} offers traffic without a packet size"
                );
            }
        }

        Ok(())
    }

    pub fn superframe_config(&self) -> Result<superframe::Config> {
        let config = superframe::Config::new()
            .with_target_load(self.allocation.target_load)?
            .with_fca(self.allocation.fca)
            .with_rc_based_allocation(self.allocation.rc_based);
        Ok(config)
    }

    pub fn request_config(&self) -> Result<request::Config> {
        let config = request::Config::new()
            .with_evaluation_interval(self.request.evaluation_interval)?
            .with_cno_report_interval(self.request.cno_report_interval)?
            .with_rtt_estimate(self.request.rtt_estimate)?;
        Ok(config)
    }

    pub fn arq_config(&self) -> Result<arq::Config> {
        let config = arq::Config::new()
            .with_max_retransmissions(self.arq.max_retransmissions)?
            .with_retransmission_timer(self.arq.retransmission_timer)?
            .with_window_size(self.arq.window_size)?
            .with_header_size(self.arq.header_size)?
            .with_rx_waiting_timer(self.arq.rx_waiting_timer)?;
        Ok(config)
    }

    pub fn frame_configs(&self) -> Result<Vec<frame::Config>> {
        self.frames
            .iter()
            .enumerate()
            .map(|(id, frame)| {
                let waveforms = frame
                    .waveforms
                    .iter()
                    .map(|w| frame::Waveform {
                        id: w.id,
                        payload_bytes: w.payload_bytes,
                        burst_length_symbols: w.burst_length_symbols,
                        cno_threshold: w.cno_threshold,
                    })
                    .collect();
                let config = frame::Config::new(
                    id as u8,
                    frame.carriers,
                    frame.symbols_per_carrier,
                    waveforms,
                )
                .with_context(|| format!("invalid frame {id}"))?;
                Ok(config)
            })
            .collect()
    }
}

impl Terminal {
    pub fn services(&self) -> Result<service::Config> {
        let services = self
            .classes
            .iter()
            .map(Class::service)
            .collect::<Result<Vec<_>>>()?;
        Ok(service::Config::new(services)?)
    }
}

impl Class {
    fn service(&self) -> Result<service::Service> {
        let mut service = service::Service::new()
            .with_rbdc(self.rbdc)
            .with_volume(self.volume)
            .with_constant_assignment(self.constant_assignment);
        if let Some(maximum) = self.maximum_rate_kbps {
            service = service.with_maximum_rate_kbps(maximum)?;
        }
        let service = service
            .with_constant_rate_kbps(self.constant_rate_kbps)?
            .with_minimum_rate_kbps(self.minimum_rate_kbps)?;
        Ok(service)
    }
}
