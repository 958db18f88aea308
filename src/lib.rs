// Replay Pipeline - client-side session telemetry
// Adaptive sampling, bounded buffering and single-flight chunked shipping

// Module declarations
pub mod config;
pub mod error;
pub mod http;
pub mod replay;
pub mod telemetry;

// Re-exports for convenience
pub use config::PipelineConfig;
pub use replay::{
    CaptureLibrary, CapturedEvent, FlushOutcome, PipelineDeps, ReplaySink, RouteObserver,
    TelemetryPipeline,
};

/// Install the fmt subscriber on stderr; `RUST_LOG` controls verbosity.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
