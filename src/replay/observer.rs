//! Route and call-state observer.
//!
//! Receives navigation notifications from the host router and call-state
//! signals from the voice-call subsystem, and turns them into sampling
//! state updates, lazy pipeline start-up and replay markers.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::replay::pipeline::{FlushOutcome, TelemetryPipeline};
use crate::replay::routes::{normalize_path, page_label};
use crate::telemetry::LifecyclePhase;

/// Custom event tag emitted on every trackable navigation
pub const ROUTE_CHANGE_TAG: &str = "route-change";
/// Custom event tag emitted on every call-state signal
pub const CALL_STATE_TAG: &str = "call-state";

/// What a navigation did to the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NavigationOutcome {
    Disabled,
    /// Excluded path; whatever was queued got flushed
    Untracked { flush: FlushOutcome },
    /// Recorder could not start; retried on the next trackable navigation
    CaptureUnavailable,
    /// Marker and checkpoint requested
    Tracked,
    /// Recording was stopped by teardown; only the sampling state moved
    TornDown,
}

pub struct RouteObserver {
    pipeline: Arc<TelemetryPipeline>,
    last_path: Mutex<Option<String>>,
}

impl RouteObserver {
    pub fn new(pipeline: Arc<TelemetryPipeline>) -> Self {
        Self {
            pipeline,
            last_path: Mutex::new(None),
        }
    }

    pub fn pipeline(&self) -> &Arc<TelemetryPipeline> {
        &self.pipeline
    }

    pub async fn on_navigate(&self, path: &str) -> NavigationOutcome {
        if !self.pipeline.is_enabled() {
            return NavigationOutcome::Disabled;
        }

        let path = normalize_path(path);
        self.pipeline.update_path(path);
        let previous = self
            .last_path
            .lock()
            .ok()
            .and_then(|mut last| last.replace(path.to_string()));

        if !self.pipeline.is_trackable(path) {
            debug!("[RouteObserver] {} is not trackable, flushing queue", path);
            let flush = self.pipeline.flush().await;
            return NavigationOutcome::Untracked { flush };
        }

        if let Err(err) = self.pipeline.ensure_initialized().await {
            debug!("[RouteObserver] Capture not started on {}: {}", path, err);
            return NavigationOutcome::CaptureUnavailable;
        }
        if self.pipeline.lifecycle() != LifecyclePhase::Active {
            debug!("[RouteObserver] Recording torn down, no marker for {}", path);
            return NavigationOutcome::TornDown;
        }

        self.pipeline.add_marker(
            ROUTE_CHANGE_TAG,
            json!({
                "path": path,
                "pageLabel": page_label(path),
                "previousPath": previous,
            }),
        );
        self.pipeline.request_checkpoint();
        NavigationOutcome::Tracked
    }

    pub fn on_call_state_signal(&self, active: bool, source: &str) {
        if !self.pipeline.is_enabled() {
            return;
        }

        self.pipeline.set_call_active(active);
        let sampling = self.pipeline.sampling_state();
        debug!(
            "[RouteObserver] Call {} via {} on {}",
            if active { "active" } else { "inactive" },
            source,
            sampling.current_path
        );

        self.pipeline.add_marker(
            CALL_STATE_TAG,
            json!({
                "active": active,
                "source": source,
                "path": sampling.current_path,
            }),
        );
    }
}
