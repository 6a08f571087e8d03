// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;

/// Allocates cyclic 8-bit sequence numbers within a bounded window
///
/// Numbers are handed out in order and the window only slides once the
/// oldest outstanding number is released.
#[derive(Debug)]
pub struct SequenceNumbers {
    window_size: u8,
    next: u8,
    /// Allocated numbers, oldest first, with their released flag
    in_use: VecDeque<(u8, bool)>,
}

impl SequenceNumbers {
    pub fn new(window_size: u8) -> Self {
        Self {
            window_size,
            next: 0,
            in_use: VecDeque::with_capacity(window_size as usize),
        }
    }

    #[inline]
    pub fn is_available(&self) -> bool {
        self.in_use.len() < self.window_size as usize
    }

    pub fn allocate(&mut self) -> Option<u8> {
        ensure!(self.is_available(), None);
        let value = self.next;
        self.next = self.next.wrapping_add(1);
        self.in_use.push_back((value, false));
        Some(value)
    }

    pub fn release(&mut self, value: u8) {
        if let Some(entry) = self.in_use.iter_mut().find(|(v, _)| *v == value) {
            entry.1 = true;
        }

        while matches!(self.in_use.front(), Some((_, true))) {
            self.in_use.pop_front();
        }
    }

    /// Number of allocated numbers still occupying the window
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.in_use.len()
    }
}
