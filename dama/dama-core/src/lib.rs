// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#[macro_use]
mod macros;

pub mod address;
pub mod arq;
pub mod control;
pub mod encapsulation;
pub mod error;
pub mod event;
pub mod frame;
pub mod queue;
pub mod request;
pub mod service;
pub mod superframe;
pub mod time;

#[cfg(test)]
mod testing;

pub use error::{Error, Kind as ErrorKind};

pub type Result<T = (), E = Error> = core::result::Result<T, E>;
