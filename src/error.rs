//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, used across the
//! crate. The taxonomy mirrors where failures can occur in an acquisition
//! session:
//!
//! - **`Config`**: wraps errors from the `config` crate (missing file, bad
//!   TOML). Semantically invalid acquisition values never surface here; they
//!   fall back to documented defaults during parsing instead.
//! - **`Io`**: wraps `std::io::Error` from protocol-log and tail operations.
//! - **`Connection`**: service or communication start failures. The session
//!   is left in a degraded `Connecting` state; there is no automatic retry.
//! - **`Device`**: failures reported by the transducer link for a single
//!   operation (a refused command, a dropped reply).
//! - **`NotConnected`**: an operation was attempted without an active session.
//! - **`Sequence`**: a step of the InitRead sequence failed. Remaining steps
//!   are aborted; already-applied steps are not rolled back.
//!
//! No error from this crate terminates the host process: every failure is
//! caught at the boundary where it occurs, logged with context, and turned
//! into a status update.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AcqResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Not connected to a transducer")]
    NotConnected,

    #[error("Init sequence failed at step '{step}': {source}")]
    Sequence {
        step: &'static str,
        #[source]
        source: Box<DaqError>,
    },
}

impl DaqError {
    /// Tags an error with the init-sequence step it occurred in.
    pub fn at_step(self, step: &'static str) -> Self {
        DaqError::Sequence {
            step,
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_error_names_the_step() {
        let err = DaqError::Device("no reply".into()).at_step("zero torque");
        let msg = err.to_string();
        assert!(msg.contains("zero torque"));
        assert!(msg.contains("no reply"));
    }
}
