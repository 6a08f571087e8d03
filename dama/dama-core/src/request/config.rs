// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{error::ValidationError, time::Duration};

/// Timing configuration of a [`RequestManager`](super::RequestManager)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    pub(crate) evaluation_interval: Duration,
    pub(crate) cno_report_interval: Duration,
    pub(crate) rtt_estimate: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! setter {
    ($name:ident, $field:ident) => {
        pub fn $name(mut self, value: Duration) -> Result<Self, ValidationError> {
            ensure!(
                !value.is_zero(),
                Err(ValidationError(concat!(stringify!($field), " must be non-zero")))
            );
            self.$field = value;
            Ok(self)
        }
    };
}

impl Config {
    pub const DEFAULT_EVALUATION_INTERVAL: Duration = Duration::from_millis(100);
    pub const DEFAULT_CNO_REPORT_INTERVAL: Duration = Duration::from_millis(100);
    pub const DEFAULT_RTT_ESTIMATE: Duration = Duration::from_millis(560);

    pub const fn new() -> Self {
        Self {
            evaluation_interval: Self::DEFAULT_EVALUATION_INTERVAL,
            cno_report_interval: Self::DEFAULT_CNO_REPORT_INTERVAL,
            rtt_estimate: Self::DEFAULT_RTT_ESTIMATE,
        }
    }

    setter!(with_evaluation_interval, evaluation_interval);
    setter!(with_cno_report_interval, cno_report_interval);
    setter!(with_rtt_estimate, rtt_estimate);

    #[inline]
    pub fn evaluation_interval(&self) -> Duration {
        self.evaluation_interval
    }

    #[inline]
    pub fn cno_report_interval(&self) -> Duration {
        self.cno_report_interval
    }

    #[inline]
    pub fn rtt_estimate(&self) -> Duration {
        self.rtt_estimate
    }

    /// Gain of the RBDC catch-up term
    #[inline]
    pub fn gain(&self) -> f64 {
        1.0 / (2.0 * self.evaluation_interval.as_secs_f64())
    }

    /// Number of past RBDC requests considered still pending at the gateway
    #[inline]
    pub fn max_pending_entries(&self) -> usize {
        (self.rtt_estimate.as_nanos() / self.evaluation_interval.as_nanos()) as usize
    }

    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        ensure!(
            self.rtt_estimate >= self.evaluation_interval,
            Err(ValidationError(
                "rtt estimate must be at least one evaluation interval"
            ))
        );
        Ok(())
    }
}
