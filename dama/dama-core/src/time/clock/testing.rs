// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::time::{Duration, Timestamp};
use core::cell::Cell;

thread_local! {
    static CLOCK: Cell<Timestamp> = const { Cell::new(Timestamp::ZERO) };
}

pub fn now() -> Timestamp {
    CLOCK.with(|c| c.get())
}

pub fn reset() {
    CLOCK.with(|c| c.set(Timestamp::ZERO));
}

pub fn advance(duration: Duration) {
    CLOCK.with(|c| {
        let next = c.get() + duration;
        c.set(next);
    });
}

/// Moves the clock forward to `target`; times in the past are ignored
pub fn advance_to(target: Timestamp) {
    CLOCK.with(|c| {
        if target > c.get() {
            c.set(target);
        }
    });
}

/// A virtual clock shared by everything on the current thread
#[derive(Clone, Copy, Debug, Default)]
pub struct Clock(());

impl super::Clock for Clock {
    fn get_time(&self) -> Timestamp {
        now()
    }
}

impl Clock {
    pub fn inc_by(&mut self, duration: Duration) {
        advance(duration);
    }
}
