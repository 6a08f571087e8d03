// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::error::ValidationError;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Config {
    pub(crate) target_load: f64,
    pub(crate) fca_enabled: bool,
    pub(crate) rc_based_allocation_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub const DEFAULT_TARGET_LOAD: f64 = 0.9;

    pub const fn new() -> Self {
        Self {
            target_load: Self::DEFAULT_TARGET_LOAD,
            fca_enabled: false,
            rc_based_allocation_enabled: false,
        }
    }

    /// Sets the share of each frame's symbols available to dynamic demand
    pub fn with_target_load(mut self, value: f64) -> Result<Self, ValidationError> {
        ensure!(
            value > 0.0 && value <= 1.0,
            Err(ValidationError("target load must be in (0, 1]"))
        );
        self.target_load = value;
        Ok(self)
    }

    /// Distributes the symbols left after pre-allocation among the terminals
    pub fn with_fca(mut self, enabled: bool) -> Self {
        self.fca_enabled = enabled;
        self
    }

    /// Dedicates each generated time slot to a single request class
    pub fn with_rc_based_allocation(mut self, enabled: bool) -> Self {
        self.rc_based_allocation_enabled = enabled;
        self
    }

    #[inline]
    pub fn target_load(&self) -> f64 {
        self.target_load
    }

    #[inline]
    pub fn fca_enabled(&self) -> bool {
        self.fca_enabled
    }

    #[inline]
    pub fn rc_based_allocation_enabled(&self) -> bool {
        self.rc_based_allocation_enabled
    }
}
