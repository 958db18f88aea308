// Error types for the replay pipeline
//
// This module defines custom error types for capture-library, transport and
// pipeline lifecycle operations. Every error carries a stable numeric code so
// diagnostics and the debug HTTP surface can report failures uniformly.

mod capture;
mod pipeline;
mod transport;

pub use capture::{log_capture_error, CaptureError, CaptureErrorCodes};
pub use pipeline::{PipelineError, PipelineErrorCodes};
pub use transport::{log_transport_error, TransportError, TransportErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the pipeline and its diagnostics surfaces.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
