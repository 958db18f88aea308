// Capture library error types and constants

use crate::error::ErrorCode;
use std::fmt;
use tracing::error;

/// Capture error code constants
///
/// Error code range: 2001-2004
pub struct CaptureErrorCodes {}

impl CaptureErrorCodes {
    /// Capture library could not be loaded or is missing in this host
    pub const UNAVAILABLE: i32 = 2001;

    /// Capture library threw while starting a recording
    pub const START_FAILED: i32 = 2002;

    /// Recording was already stopped
    pub const ALREADY_STOPPED: i32 = 2003;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 2004;
}

/// Log a capture error with structured context
///
/// Capture failures never reach the host page; they are logged and the
/// pipeline stays uninitialized until the next trackable navigation.
pub fn log_capture_error(err: &CaptureError, context: &str) {
    error!(
        "Capture error in {}: code={}, component=CaptureAdapter, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Capture-library errors
///
/// Error code range: 2001-2004
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// Capture library is not available in this host
    Unavailable { reason: String },

    /// Starting the recorder failed
    StartFailed { reason: String },

    /// Recorder already stopped
    AlreadyStopped,

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },
}

impl ErrorCode for CaptureError {
    fn code(&self) -> i32 {
        match self {
            CaptureError::Unavailable { .. } => CaptureErrorCodes::UNAVAILABLE,
            CaptureError::StartFailed { .. } => CaptureErrorCodes::START_FAILED,
            CaptureError::AlreadyStopped => CaptureErrorCodes::ALREADY_STOPPED,
            CaptureError::LockPoisoned { .. } => CaptureErrorCodes::LOCK_POISONED,
        }
    }

    fn message(&self) -> String {
        match self {
            CaptureError::Unavailable { reason } => {
                format!("Capture library unavailable: {}", reason)
            }
            CaptureError::StartFailed { reason } => {
                format!("Failed to start recording: {}", reason)
            }
            CaptureError::AlreadyStopped => "Recording already stopped".to_string(),
            CaptureError::LockPoisoned { component } => {
                format!("Lock poisoned for component: {}", component)
            }
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CaptureError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for CaptureError {}
