//! Session replay capture pipeline.
//!
//! Data flows recorder → trackability filter → sampling gate → bounded
//! queue → flush scheduler → sink. The route observer runs alongside,
//! injecting markers and retuning the gate.

pub mod capture;
pub mod chunk;
pub mod event;
pub mod identity;
pub mod observer;
pub mod pipeline;
pub mod queue;
pub mod routes;
pub mod sampling;
pub mod sink;

pub use capture::{CaptureLibrary, CaptureOptions, EventEmitter, LoopbackCapture, StopHandle};
pub use chunk::{Chunk, ChunkMetadata, ReplayRow, REPLAY_EVENT_TYPE};
pub use event::{CapturedEvent, EventKind, SourceCategory};
pub use identity::{InMemorySessionStore, SessionIdentity, SessionStore};
pub use observer::{NavigationOutcome, RouteObserver, CALL_STATE_TAG, ROUTE_CHANGE_TAG};
pub use pipeline::{FlushOutcome, FlushStop, PipelineDeps, PipelineStats, TelemetryPipeline};
pub use queue::EventQueue;
pub use routes::{page_label, TrackabilityFilter};
pub use sampling::{EventBucket, SamplingGate, SamplingState};
pub use sink::{JsonLinesSink, MemorySink, ReplaySink};
