// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{error::ValidationError, time::Duration};

/// Largest ARQ window
///
/// After a flush the sender may run up to twice the window ahead of the
/// receiver, and that span has to stay within half of the 8-bit sequence
/// space to be unwrapped unambiguously.
pub const MAX_WINDOW_SIZE: u8 = 64;

/// Configuration of an ARQ [`Encapsulator`](super::Encapsulator)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    pub(crate) max_retransmissions: u32,
    pub(crate) retransmission_timer: Duration,
    pub(crate) window_size: u8,
    pub(crate) header_size: usize,
    pub(crate) rx_waiting_timer: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! duration_setter {
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
    pub const DEFAULT_MAX_RETRANSMISSIONS: u32 = 2;
    pub const DEFAULT_RETRANSMISSION_TIMER: Duration = Duration::from_millis(600);
    pub const DEFAULT_WINDOW_SIZE: u8 = 10;
    pub const DEFAULT_HEADER_SIZE: usize = 1;
    pub const DEFAULT_RX_WAITING_TIMER: Duration = Duration::from_millis(1800);

    pub const fn new() -> Self {
        Self {
            max_retransmissions: Self::DEFAULT_MAX_RETRANSMISSIONS,
            retransmission_timer: Self::DEFAULT_RETRANSMISSION_TIMER,
            window_size: Self::DEFAULT_WINDOW_SIZE,
            header_size: Self::DEFAULT_HEADER_SIZE,
            rx_waiting_timer: Self::DEFAULT_RX_WAITING_TIMER,
        }
    }

    pub fn with_max_retransmissions(mut self, value: u32) -> Result<Self, ValidationError> {
        self.max_retransmissions = value;
        Ok(self)
    }

    pub fn with_window_size(mut self, value: u8) -> Result<Self, ValidationError> {
        ensure!(
            (1..=MAX_WINDOW_SIZE).contains(&value),
            Err(ValidationError(
                "window_size must be within 1..=64 so that twice the window fits half the sequence space"
            ))
        );
        self.window_size = value;
        Ok(self)
    }

    /// Sets the size of the ARQ header, the sequence number followed by padding
    pub fn with_header_size(mut self, value: usize) -> Result<Self, ValidationError> {
        ensure!(
            value >= 1,
            Err(ValidationError("header_size must be at least one byte"))
        );
        self.header_size = value;
        Ok(self)
    }

    duration_setter!(with_retransmission_timer, retransmission_timer);
    duration_setter!(with_rx_waiting_timer, rx_waiting_timer);

    #[inline]
    pub fn max_retransmissions(&self) -> u32 {
        self.max_retransmissions
    }

    #[inline]
    pub fn retransmission_timer(&self) -> Duration {
        self.retransmission_timer
    }

    #[inline]
    pub fn window_size(&self) -> u8 {
        self.window_size
    }

    #[inline]
    pub fn header_size(&self) -> usize {
        self.header_size
    }

    #[inline]
    pub fn rx_waiting_timer(&self) -> Duration {
        self.rx_waiting_timer
    }
}
