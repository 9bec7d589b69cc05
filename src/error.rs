//! Harness error taxonomy.
//!
//! Transport-level failures are never silently swallowed: they either
//! abort the enclosing operation or are converted into one of these
//! explicit outcomes before reaching the operator.

use crate::bus::{BusError, Role};
use crate::cli::TestKind;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The readiness probe exhausted its retry budget during startup.
    #[error("unable to contact message bus after {attempts} attempts")]
    BusUnreachable { attempts: u32 },

    /// A test was requested with zero matching minions registered.
    #[error("no {role} workers visible")]
    NoWorkersVisible { role: Role },

    /// The completion barrier was not satisfied before the deadline.
    /// Partial aggregates are discarded; a timed-out run reports
    /// failure, not a partial result.
    #[error("{test} test timed out after {timeout:?}")]
    TestTimeout { test: TestKind, timeout: Duration },

    #[error("unrecognized test {name:?} (available tests: {})", TestKind::NAMES.join(", "))]
    UnknownTest { name: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("could not write report: {0}")]
    Report(String),

    #[error(transparent)]
    Bus(#[from] BusError),
}

pub type Result<T> = std::result::Result<T, Error>;
