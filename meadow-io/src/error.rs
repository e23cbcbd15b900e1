//! Error types for MeadowIO
//!
//! # Error Recovery Strategies
//!
//! - **`Io`**: Generic I/O error from a port backend. Usually retryable
//!   after a brief delay; persistent failures degrade the port's health
//!   probe and the supervisor demotes dependent features.
//!
//! - **`PortUnavailable`**: The backend for a requested capability is not
//!   bound (e.g. camera on a unit without one). Fatal at initialization,
//!   surfaced as degraded health at runtime.
//!
//! - **`Rejected`**: An actuator refused a command, most commonly because
//!   the arbitration token was stale. This is not retryable with the same
//!   command; the producer must go through the supervisor again.
//!
//! # Safety Note
//!
//! Actuator backends must stop the motors on their own when commands cease
//! arriving. A failed or slow control stack therefore cannot leave the
//! vehicle driving.

use thiserror::Error;

/// Errors that can occur in MeadowIO
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Port unavailable: {0}")]
    PortUnavailable(String),

    #[error("Command rejected: {0}")]
    Rejected(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
