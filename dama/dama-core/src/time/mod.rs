// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Virtual time used by every component.
//!
//! Components never read a global clock. They are handed the current
//! [`Timestamp`] on every call and expose their armed timers through
//! [`timer::Provider`] so the driving scheduler knows when to call back.

mod clock;
pub mod timer;
mod timestamp;

pub use clock::*;
pub use core::time::Duration;
pub use timer::Timer;
pub use timestamp::*;
