// Transport error types and constants

use crate::error::ErrorCode;
use std::fmt;
use tracing::warn;

/// Transport error code constants
///
/// Error code range: 3001-3004
pub struct TransportErrorCodes {}

impl TransportErrorCodes {
    /// Remote endpoint rejected the insert
    pub const REJECTED: i32 = 3001;

    /// I/O failure while writing the row
    pub const IO: i32 = 3002;

    /// Row could not be serialized
    pub const SERIALIZATION: i32 = 3003;

    /// Sink was closed
    pub const CLOSED: i32 = 3004;
}

/// Log a transport error with structured context
///
/// Transmission failures are expected under flaky networks, so they are
/// reported at warn level.
pub fn log_transport_error(err: &TransportError, context: &str) {
    warn!(
        "Transport error in {}: code={}, component=ReplaySink, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors returned by a replay sink when persisting a chunk row
///
/// Error code range: 3001-3004
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Endpoint answered with an error
    Rejected { status: u16, reason: String },

    /// Underlying I/O failed
    Io { details: String },

    /// Row serialization failed
    Serialization { details: String },

    /// Sink no longer accepts rows
    Closed,
}

impl ErrorCode for TransportError {
    fn code(&self) -> i32 {
        match self {
            TransportError::Rejected { .. } => TransportErrorCodes::REJECTED,
            TransportError::Io { .. } => TransportErrorCodes::IO,
            TransportError::Serialization { .. } => TransportErrorCodes::SERIALIZATION,
            TransportError::Closed => TransportErrorCodes::CLOSED,
        }
    }

    fn message(&self) -> String {
        match self {
            TransportError::Rejected { status, reason } => {
                format!("Insert rejected with status {}: {}", status, reason)
            }
            TransportError::Io { details } => format!("I/O error: {}", details),
            TransportError::Serialization { details } => {
                format!("Failed to serialize row: {}", details)
            }
            TransportError::Closed => "Sink closed".to_string(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TransportError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for TransportError {}

/// Convert from std::io::Error to TransportError
impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io {
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Serialization {
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_messages() {
        let err = TransportError::Rejected {
            status: 503,
            reason: "unavailable".to_string(),
        };
        assert_eq!(
            err.message(),
            "Insert rejected with status 503: unavailable"
        );
        assert_eq!(err.code(), TransportErrorCodes::REJECTED);

        assert_eq!(TransportError::Closed.message(), "Sink closed");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::other("disk gone");
        let err: TransportError = io_err.into();
        match err {
            TransportError::Io { details } => assert!(details.contains("disk gone")),
            _ => panic!("Expected Io"),
        }
    }
}
