// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Lower layer service configuration of the request classes

use crate::error::ValidationError;

/// Index of a request class, i.e. the service category of one traffic flow
pub type RcIndex = u8;

/// The set of discrete values a capacity request may carry
///
/// Capacity request fields are encoded with a limited number of bits, so
/// estimated demand is rounded up to the next representable value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Quantization {
    /// Sorted, deduplicated, non-zero values
    values: Vec<u32>,
}

impl Quantization {
    /// Creates a table from an explicit list of allowed values
    pub fn new(mut values: Vec<u32>) -> Result<Self, ValidationError> {
        values.retain(|v| *v > 0);
        values.sort_unstable();
        values.dedup();
        ensure!(
            !values.is_empty(),
            Err(ValidationError("quantization table must contain a non-zero value"))
        );
        Ok(Self { values })
    }

    /// Creates a table of the values representable with an 8-bit mantissa
    /// multiplied by `base` and one of the `scales`
    pub fn scaled(base: u32, scales: &[u32]) -> Result<Self, ValidationError> {
        ensure!(base > 0, Err(ValidationError("quantization base must be non-zero")));
        let values = scales
            .iter()
            .flat_map(|scale| (1..=u8::MAX as u32).map(move |m| m * base * scale))
            .collect();
        Self::new(values)
    }

    /// Returns the default RBDC table in kbps: 2 kbps steps with a x16 scale
    pub fn default_rbdc() -> Self {
        Self::scaled(2, &[1, 16]).expect("valid default table")
    }

    /// Returns the default VBDC table in KBytes: 1 KB steps with a x16 scale
    pub fn default_vbdc() -> Self {
        Self::scaled(1, &[1, 16]).expect("valid default table")
    }

    /// Rounds `value` up to the next representable value
    ///
    /// Zero and negative values map to zero; values above the table saturate at
    /// the largest entry.
    pub fn ceil(&self, value: f64) -> u32 {
        ensure!(value > 0.0, 0);
        let idx = self.values.partition_point(|v| (*v as f64) < value);
        self.values.get(idx).copied().unwrap_or_else(|| self.max())
    }

    /// Rounds `value` down to the previous representable value, or zero
    pub fn floor(&self, value: f64) -> u32 {
        let idx = self.values.partition_point(|v| (*v as f64) <= value);
        idx.checked_sub(1).map_or(0, |idx| self.values[idx])
    }

    #[inline]
    pub fn max(&self) -> u32 {
        *self.values.last().expect("table is never empty")
    }
}

/// Configuration of a single request class
#[derive(Clone, Debug, PartialEq)]
pub struct Service {
    pub(crate) rbdc_allowed: bool,
    pub(crate) volume_allowed: bool,
    pub(crate) constant_assignment_provided: bool,
    pub(crate) constant_service_rate_kbps: u32,
    pub(crate) maximum_service_rate_kbps: u32,
    pub(crate) minimum_service_rate_kbps: u32,
    pub(crate) rbdc_quantization: Quantization,
    pub(crate) vbdc_quantization: Quantization,
}

impl Default for Service {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! flag {
    ($name:ident, $field:ident) => {
        pub fn $name(mut self, value: bool) -> Self {
            self.$field = value;
            self
        }
    };
}

macro_rules! rate {
    ($name:ident, $field:ident) => {
        pub fn $name(mut self, value: u32) -> Result<Self, ValidationError> {
            self.$field = value;
            self.validate()?;
            Ok(self)
        }
    };
}

impl Service {
    pub fn new() -> Self {
        Self {
            rbdc_allowed: false,
            volume_allowed: false,
            constant_assignment_provided: false,
            constant_service_rate_kbps: 0,
            maximum_service_rate_kbps: 512,
            minimum_service_rate_kbps: 0,
            rbdc_quantization: Quantization::default_rbdc(),
            vbdc_quantization: Quantization::default_vbdc(),
        }
    }

    flag!(with_rbdc, rbdc_allowed);
    flag!(with_volume, volume_allowed);
    flag!(with_constant_assignment, constant_assignment_provided);
    rate!(with_constant_rate_kbps, constant_service_rate_kbps);
    rate!(with_maximum_rate_kbps, maximum_service_rate_kbps);
    rate!(with_minimum_rate_kbps, minimum_service_rate_kbps);

    pub fn with_rbdc_quantization(mut self, table: Quantization) -> Self {
        self.rbdc_quantization = table;
        self
    }

    pub fn with_vbdc_quantization(mut self, table: Quantization) -> Self {
        self.vbdc_quantization = table;
        self
    }

    #[inline]
    pub fn rbdc_allowed(&self) -> bool {
        self.rbdc_allowed
    }

    #[inline]
    pub fn volume_allowed(&self) -> bool {
        self.volume_allowed
    }

    #[inline]
    pub fn constant_assignment_provided(&self) -> bool {
        self.constant_assignment_provided
    }

    /// Returns the CRA rate, or zero when CRA is not provided
    #[inline]
    pub fn constant_rate_kbps(&self) -> u32 {
        if self.constant_assignment_provided {
            self.constant_service_rate_kbps
        } else {
            0
        }
    }

    #[inline]
    pub fn maximum_rate_kbps(&self) -> u32 {
        self.maximum_service_rate_kbps
    }

    #[inline]
    pub fn minimum_rate_kbps(&self) -> u32 {
        self.minimum_service_rate_kbps
    }

    #[inline]
    pub fn rbdc_quantization(&self) -> &Quantization {
        &self.rbdc_quantization
    }

    #[inline]
    pub fn vbdc_quantization(&self) -> &Quantization {
        &self.vbdc_quantization
    }

    fn validate(&self) -> Result<(), ValidationError> {
        ensure!(
            self.minimum_service_rate_kbps <= self.maximum_service_rate_kbps,
            Err(ValidationError(
                "minimum service rate exceeds the maximum service rate"
            ))
        );
        ensure!(
            !self.constant_assignment_provided
                || self.constant_service_rate_kbps < self.maximum_service_rate_kbps,
            Err(ValidationError(
                "constant service rate must be below the maximum service rate"
            ))
        );
        Ok(())
    }
}

/// Configuration of all request classes of a terminal
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Config {
    services: Vec<Service>,
}

impl Config {
    pub fn new(services: Vec<Service>) -> Result<Self, ValidationError> {
        ensure!(
            services.len() <= RcIndex::MAX as usize + 1,
            Err(ValidationError("too many request classes"))
        );
        for service in &services {
            service.validate()?;
        }
        Ok(Self { services })
    }

    /// Returns the number of request classes with dynamic assignment
    #[inline]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    #[inline]
    pub fn get(&self, rc: RcIndex) -> Option<&Service> {
        self.services.get(rc as usize)
    }

    /// Iterates over the request classes in index order
    pub fn iter(&self) -> impl Iterator<Item = (RcIndex, &Service)> {
        self.services
            .iter()
            .enumerate()
            .map(|(idx, service)| (idx as RcIndex, service))
    }
}
