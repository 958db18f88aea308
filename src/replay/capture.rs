//! Capture library adapter.
//!
//! The real recorder lives outside this crate. It is started with a set of
//! options and a callback, and afterwards accepts custom markers and
//! snapshot requests which it delivers back through that same callback.

use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::CaptureError;
use crate::replay::event::{now_timestamp_ms, CapturedEvent};

/// Callback through which the recorder hands over events
pub type EventEmitter = Arc<dyn Fn(CapturedEvent) + Send + Sync>;

/// Built-in sampling hints applied by the recorder itself
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecorderSampling {
    pub mousemove_ms: u64,
    pub scroll_ms: u64,
    pub media_ms: u64,
    /// Record only the last value of a burst of input changes
    pub input_last_only: bool,
}

impl Default for RecorderSampling {
    fn default() -> Self {
        Self {
            mousemove_ms: 50,
            scroll_ms: 150,
            media_ms: 400,
            input_last_only: true,
        }
    }
}

/// Options passed to the recorder's `start`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureOptions {
    pub mask_all_inputs: bool,
    pub inline_stylesheet: bool,
    /// Periodic full checkpoint by time
    pub checkout_every_ms: u64,
    /// Periodic full checkpoint by event count
    pub checkout_every_events: u32,
    pub sampling: RecorderSampling,
    pub record_canvas: bool,
    pub collect_fonts: bool,
    pub inline_images: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            mask_all_inputs: true,
            inline_stylesheet: true,
            checkout_every_ms: 30_000,
            checkout_every_events: 300,
            sampling: RecorderSampling::default(),
            record_canvas: false,
            collect_fonts: false,
            inline_images: false,
        }
    }
}

/// Stops a running recording when invoked
pub struct StopHandle(Box<dyn FnOnce() + Send>);

impl StopHandle {
    pub fn new(stop: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(stop))
    }

    pub fn stop(self) {
        (self.0)()
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StopHandle")
    }
}

/// Boundary over the external recorder
pub trait CaptureLibrary: Send + Sync {
    /// Start recording; events flow into `emit` until the handle is stopped.
    fn start(
        &self,
        options: CaptureOptions,
        emit: EventEmitter,
    ) -> BoxFuture<'_, Result<StopHandle, CaptureError>>;

    /// Inject an application marker into the stream.
    fn add_custom_event(&self, tag: &str, payload: Value);

    /// Request a full snapshot; `is_checkout` marks it as a replay checkpoint.
    fn take_full_snapshot(&self, is_checkout: bool);
}

#[derive(Default)]
struct LoopbackState {
    emitter: Option<EventEmitter>,
    options: Option<CaptureOptions>,
    pending_failures: u32,
    starts: u32,
    stops: u32,
}

/// In-process recorder that echoes markers and snapshots straight back
/// through the emitter. Drives simulations and tests.
#[derive(Clone, Default)]
pub struct LoopbackCapture {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` start attempts fail.
    pub fn fail_next_starts(&self, count: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.pending_failures = count;
        }
    }

    /// Feed a raw event as if the recorder had observed it.
    /// Returns `false` when no recording is active.
    pub fn emit(&self, event: CapturedEvent) -> bool {
        let emitter = self
            .state
            .lock()
            .ok()
            .and_then(|state| state.emitter.clone());
        match emitter {
            Some(emit) => {
                emit(event);
                true
            }
            None => false,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.emitter.is_some())
            .unwrap_or(false)
    }

    pub fn start_count(&self) -> u32 {
        self.state.lock().map(|state| state.starts).unwrap_or(0)
    }

    pub fn stop_count(&self) -> u32 {
        self.state.lock().map(|state| state.stops).unwrap_or(0)
    }

    pub fn options(&self) -> Option<CaptureOptions> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.options.clone())
    }
}

impl CaptureLibrary for LoopbackCapture {
    fn start(
        &self,
        options: CaptureOptions,
        emit: EventEmitter,
    ) -> BoxFuture<'_, Result<StopHandle, CaptureError>> {
        Box::pin(async move {
            let mut state = self.state.lock().map_err(|_| CaptureError::LockPoisoned {
                component: "loopback_capture".to_string(),
            })?;
            state.starts += 1;
            if state.pending_failures > 0 {
                state.pending_failures -= 1;
                return Err(CaptureError::StartFailed {
                    reason: "scripted start failure".to_string(),
                });
            }
            state.emitter = Some(emit);
            state.options = Some(options);
            drop(state);

            let shared = Arc::clone(&self.state);
            Ok(StopHandle::new(move || {
                if let Ok(mut state) = shared.lock() {
                    state.emitter = None;
                    state.stops += 1;
                }
                debug!("[LoopbackCapture] Recording stopped");
            }))
        })
    }

    fn add_custom_event(&self, tag: &str, payload: Value) {
        self.emit(CapturedEvent::custom(tag, now_timestamp_ms(), payload));
    }

    fn take_full_snapshot(&self, is_checkout: bool) {
        self.emit(CapturedEvent::full_snapshot(
            now_timestamp_ms(),
            json!({ "isCheckout": is_checkout }),
        ));
    }
}
