//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the entire crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the kinds of failure a rig session can run into, from configuration problems to a
//! device that never answers.
//!
//! ## Error Hierarchy
//!
//! - **`Config`** / **`Configuration`**: parse errors from `figment` and semantic errors
//!   caught by validation (unknown parameter names, bad log level, ...).
//! - **`Connect`**: the serial port is busy, missing or already open. Recovered locally:
//!   the controller returns to `Closed`.
//! - **`HandshakeTimeout`**: the device stayed silent after the parameter upload. Terminal
//!   for that open attempt.
//! - **`Transport`** / **`ScannerFailed`**: I/O failures while a session is live. The session
//!   is finalized with whatever was captured.
//! - **`StoreOverflow`**: an event store ran out of pre-sized capacity. Fatal to the session,
//!   which is finalized and marked truncated.
//! - **`FileCreate`** / **`StoreAllocation`**: the session file or its event stores could
//!   not be created. The controller stays `Open`.
//! - **`InvalidTransition`** / **`CapabilityDisabled`**: an operation was requested in a state
//!   that does not allow it.
//!
//! By using `#[from]`, `DaqError` can be created from underlying error types with `?`.

use crate::session::state::{Capability, SessionState};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration parsed but is semantically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Plain I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serial port could not be opened.
    #[error("Could not open serial port '{port}': {message}")]
    Connect {
        /// Port identifier that was requested.
        port: String,
        /// Underlying OS or driver message.
        message: String,
    },

    /// The device did not reply to the parameter upload in time.
    #[error("Uploading timed out after {0:?}. Start signal not found; make sure the device is configured")]
    HandshakeTimeout(Duration),

    /// Read or write failure on an open transport.
    #[error("Serial transport error: {0}")]
    Transport(String),

    /// Operation needs an open transport but none is open.
    #[error("Serial port not connected")]
    SerialPortNotConnected,

    /// The background scanner stopped before the device ended the session.
    #[error("Event scanner failed: {0}")]
    ScannerFailed(String),

    /// An event store is full.
    #[error("Event store '{kind}' is full ({capacity} columns); session truncated")]
    StoreOverflow {
        /// Name of the event kind whose store overflowed.
        kind: String,
        /// Pre-sized capacity of that store.
        capacity: usize,
    },

    /// Memory for an event store could not be reserved.
    #[error("Could not allocate {capacity} columns for event store '{kind}'")]
    StoreAllocation {
        /// Name of the event kind.
        kind: String,
        /// Requested capacity.
        capacity: usize,
    },

    /// The session file could not be created or opened for writing.
    #[error("Could not create file '{}' to save data: {message}", path.display())]
    FileCreate {
        /// Requested save path.
        path: PathBuf,
        /// Reason reported by the storage backend.
        message: String,
    },

    /// Failure inside a storage backend after the file was created.
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The requested operation is not valid in the current session state.
    #[error("Cannot {action} while session is {state}")]
    InvalidTransition {
        /// State the controller was in.
        state: SessionState,
        /// Operation that was attempted.
        action: &'static str,
    },

    /// The capability group guarding an operation is disabled.
    #[error("Capability '{0}' is currently disabled")]
    CapabilityDisabled(Capability),

    /// A cargo feature needed for the operation is not compiled in.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl DaqError {
    /// Whether the error leaves the controller usable without operator intervention
    /// beyond acknowledging it.
    ///
    /// Recoverable errors revert the state machine to a well-defined earlier state
    /// (`Closed` or `Open`) without losing recorded data.
    pub fn can_recover(&self) -> bool {
        match self {
            DaqError::Connect { .. }
            | DaqError::HandshakeTimeout(_)
            | DaqError::FileCreate { .. }
            | DaqError::StoreAllocation { .. }
            | DaqError::InvalidTransition { .. }
            | DaqError::CapabilityDisabled(_)
            | DaqError::SerialPortNotConnected => true,
            DaqError::Config(_)
            | DaqError::Configuration(_)
            | DaqError::Io(_)
            | DaqError::Transport(_)
            | DaqError::ScannerFailed(_)
            | DaqError::StoreOverflow { .. }
            | DaqError::Storage(_)
            | DaqError::Serialization(_)
            | DaqError::FeatureNotEnabled(_) => false,
        }
    }

    /// Whether the error aborts a running session.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            DaqError::Transport(_) | DaqError::ScannerFailed(_) | DaqError::StoreOverflow { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_error_is_recoverable() {
        let err = DaqError::Connect {
            port: "/dev/ttyACM0".into(),
            message: "Device or resource busy".into(),
        };
        assert!(err.can_recover());
        assert!(!err.is_session_fatal());
        assert!(err.to_string().contains("/dev/ttyACM0"));
        assert!(err.to_string().contains("busy"));
    }

    #[test]
    fn overflow_is_fatal_to_session() {
        let err = DaqError::StoreOverflow {
            kind: "lick".into(),
            capacity: 10,
        };
        assert!(!err.can_recover());
        assert!(err.is_session_fatal());
        assert!(err.to_string().contains("lick"));
    }

    #[test]
    fn invalid_transition_names_state() {
        let err = DaqError::InvalidTransition {
            state: SessionState::Running,
            action: "close",
        };
        assert_eq!(err.to_string(), "Cannot close while session is Running");
    }
}
