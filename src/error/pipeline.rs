// Pipeline lifecycle error types

use crate::error::{CaptureError, ErrorCode};
use std::fmt;

/// Pipeline error code constants
///
/// Error code range: 4001-4002
pub struct PipelineErrorCodes {}

impl PipelineErrorCodes {
    /// Pipeline disabled by configuration
    pub const DISABLED: i32 = 4001;

    /// Capture library failed during initialization
    pub const CAPTURE: i32 = 4002;
}

/// Errors raised by pipeline lifecycle operations
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Enablement flag is off
    Disabled,

    /// Capture library failure
    Capture(CaptureError),
}

impl ErrorCode for PipelineError {
    fn code(&self) -> i32 {
        match self {
            PipelineError::Disabled => PipelineErrorCodes::DISABLED,
            PipelineError::Capture(_) => PipelineErrorCodes::CAPTURE,
        }
    }

    fn message(&self) -> String {
        match self {
            PipelineError::Disabled => "Replay pipeline disabled".to_string(),
            PipelineError::Capture(err) => err.message(),
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PipelineError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Capture(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CaptureError> for PipelineError {
    fn from(err: CaptureError) -> Self {
        PipelineError::Capture(err)
    }
}
