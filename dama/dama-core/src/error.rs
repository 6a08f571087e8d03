// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Fatal configuration and caller-contract violations
//!
//! Every [`Kind`] describes an impossible configuration or a broken caller
//! contract. Callers receiving an [`Error`] must abort the run; recoverable
//! conditions (an unallocatable terminal, ARQ data loss) are reported through
//! return values and events instead.

use crate::service::RcIndex;
use core::{fmt, panic::Location};

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Error {
    kind: Kind,
    location: &'static Location<'static>,
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("crate", &"dama-core")
            .field("file", &self.file())
            .field("line", &self.location.line())
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let Self { kind, location } = self;
        let file = self.file();
        let line = location.line();
        write!(f, "[dama-core::{file}:{line}]: {kind}")
    }
}

impl std::error::Error for Error {}

impl Error {
    #[track_caller]
    #[inline]
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            location: Location::caller(),
        }
    }

    #[inline]
    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    #[inline]
    fn file(&self) -> &'static str {
        self.location
            .file()
            .trim_start_matches(concat!(env!("CARGO_MANIFEST_DIR"), "/src/"))
    }
}

impl From<Kind> for Error {
    #[track_caller]
    #[inline]
    fn from(kind: Kind) -> Self {
        Self::new(kind)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Kind {
    #[error("simultaneous RBDC and VBDC for request class {rc} is not supported")]
    SimultaneousRbdcVbdc { rc: RcIndex },
    #[error("unable to send control message, no control sink is registered")]
    MissingControlSink,
    #[error("no queue statistics provider is registered for request class {rc}")]
    MissingQueueProvider { rc: RcIndex },
    #[error("the TBTP container must contain at least one message")]
    EmptyTbtpContainer,
    #[error("the superframe allocator was configured without frames")]
    NoFrames,
    #[error("minimum rate of {requested} bytes exceeds the smallest carrier payload of {carrier} bytes")]
    MinimumRateExceedsCarrier { requested: u32, carrier: u32 },
    #[error("minimum rate of {requested} bytes exceeds the {remaining} bytes left for minimum rates")]
    MinimumRateExceedsRemaining { requested: u32, remaining: u32 },
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: &'static str },
}

impl Kind {
    #[inline]
    #[track_caller]
    pub(crate) fn err(self) -> Error {
        Error::new(self)
    }
}

/// Returned by configuration builders when a value is out of range
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub(crate) &'static str);

impl From<ValidationError> for Error {
    #[track_caller]
    #[inline]
    fn from(error: ValidationError) -> Self {
        Kind::InvalidConfig { reason: error.0 }.err()
    }
}
