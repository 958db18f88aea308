//! Diagnostic metric types describing pipeline behaviour, exposed to the
//! debug HTTP surface and the simulation CLI.

use serde::{Deserialize, Serialize};

/// Pipeline lifecycle stages
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    #[default]
    Uninitialized,
    Initializing,
    Active,
    /// Teardown hook ran; not a formal state of the pipeline
    TornDown,
}

/// Why an event never made it into a chunk
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Untrackable,
    Sampled,
    Evicted,
    TransmissionFailed,
}

/// Metric events covering queue pressure, chunk transmission and lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PipelineMetric {
    QueueOccupancy {
        percent: f32,
    },
    QueueEvicted {
        count: usize,
    },
    ChunkSent {
        sequence: u64,
        events: usize,
        bytes: usize,
    },
    ChunkFailed {
        sequence: u64,
        events: usize,
        code: i32,
    },
    Lifecycle {
        phase: LifecyclePhase,
        timestamp_ms: u64,
    },
}
