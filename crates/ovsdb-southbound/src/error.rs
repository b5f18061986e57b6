//! Error types for southbound reconciliation.
//!
//! Only two classes are meant to reach callers: capacity errors from a
//! saturated worker pool and invariant violations caused by misuse of an
//! API. Device-facing failures are recovered locally through retry.

use std::io;
use thiserror::Error;

/// Result type alias for southbound operations.
pub type Result<T> = std::result::Result<T, SouthboundError>;

/// Errors that can occur while reconciling device state.
#[derive(Debug, Error)]
pub enum SouthboundError {
    /// The worker pool queue is full; the submission was not accepted.
    #[error("Reconciliation queue is full (capacity {capacity})")]
    CapacityExceeded {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// The engine has been shut down and accepts no more work.
    #[error("Reconciliation engine is shut down")]
    EngineShutdown,

    /// A caller broke an API contract.
    #[error("Invariant violation: {message}")]
    InvariantViolation {
        /// Description of the broken invariant.
        message: String,
    },

    /// A device operation failed (connect, read, replay).
    #[error("Device '{device}' operation failed: {message}")]
    Device {
        /// The device node identifier.
        device: String,
        /// Error message.
        message: String,
    },

    /// A liveness probe was answered with an error.
    #[error("Liveness probe to connection {connection} failed: {message}")]
    ProbeFailed {
        /// The probed connection.
        connection: u64,
        /// Error message.
        message: String,
    },

    /// A liveness probe got no answer in time.
    #[error("Liveness probe to connection {connection} timed out after {timeout_ms}ms")]
    ProbeTimeout {
        /// The probed connection.
        connection: u64,
        /// The probe timeout in milliseconds.
        timeout_ms: u64,
    },

    /// Building or committing a device transaction failed.
    #[error("Transaction failed: {message}")]
    Transaction {
        /// Error message.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    Config {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// IO error (configuration file access).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration file could not be parsed.
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl SouthboundError {
    /// Creates an invariant violation error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Creates a device error.
    pub fn device(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Device {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Creates a transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SouthboundError::CapacityExceeded { .. }
                | SouthboundError::Device { .. }
                | SouthboundError::ProbeFailed { .. }
                | SouthboundError::ProbeTimeout { .. }
                | SouthboundError::Transaction { .. }
        )
    }

    /// Returns true for the errors that are surfaced to callers rather
    /// than recovered through retry.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            SouthboundError::CapacityExceeded { .. } | SouthboundError::InvariantViolation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SouthboundError::CapacityExceeded { capacity: 5000 };
        assert_eq!(err.to_string(), "Reconciliation queue is full (capacity 5000)");

        let err = SouthboundError::device("hwvtep://uuid/1", "connection refused");
        assert_eq!(
            err.to_string(),
            "Device 'hwvtep://uuid/1' operation failed: connection refused"
        );
    }

    #[test]
    fn test_probe_timeout_display() {
        let err = SouthboundError::ProbeTimeout {
            connection: 7,
            timeout_ms: 1000,
        };
        assert!(err.to_string().contains("connection 7"));
        assert!(err.to_string().contains("1000ms"));
    }

    #[test]
    fn test_classification() {
        assert!(SouthboundError::CapacityExceeded { capacity: 1 }.is_retryable());
        assert!(SouthboundError::CapacityExceeded { capacity: 1 }.is_caller_error());
        assert!(SouthboundError::device("d", "down").is_retryable());
        assert!(!SouthboundError::device("d", "down").is_caller_error());
        assert!(SouthboundError::invariant("bug").is_caller_error());
        assert!(!SouthboundError::invariant("bug").is_retryable());
        assert!(!SouthboundError::EngineShutdown.is_retryable());
    }
}
