//! Telemetry pipeline: admission, buffering and the flush scheduler.
//!
//! One `TelemetryPipeline` is built per tab and shared through an `Arc`.
//! Queue, sampling gate, flush cursor and sequence counter sit behind a
//! single mutex that is never held across an `.await`; the flush cursor
//! inside it guarantees at most one drain loop is active at a time.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{log_capture_error, log_transport_error, ErrorCode, PipelineError};
use crate::replay::capture::{CaptureLibrary, EventEmitter, StopHandle};
use crate::replay::chunk::Chunk;
use crate::replay::event::CapturedEvent;
use crate::replay::identity::{SessionIdentity, SessionStore};
use crate::replay::queue::EventQueue;
use crate::replay::routes::TrackabilityFilter;
use crate::replay::sampling::{SamplingGate, SamplingState};
use crate::replay::sink::ReplaySink;
use crate::telemetry::{DropReason, LifecyclePhase, TelemetryHub};

/// External collaborators the pipeline is wired to
pub struct PipelineDeps {
    pub capture: Arc<dyn CaptureLibrary>,
    pub sink: Arc<dyn ReplaySink>,
    pub session_store: Arc<dyn SessionStore>,
}

/// Non-reentrant lock plus one pending continuation
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct FlushCursor {
    is_flushing: bool,
    flush_requested: bool,
    /// A count-triggered flush task is spawned but has not reached `flush` yet
    flush_scheduled: bool,
}

/// Why a flush invocation returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlushStop {
    /// Queue emptied
    #[default]
    Drained,
    /// Leftover events are fewer than the flush threshold
    BelowThreshold,
    /// No subject to attribute the chunk to yet
    NoIdentity,
    /// Remote insert failed; the chunk is gone
    TransmissionFailed,
    /// Another flush was running; it will continue on our behalf
    Coalesced,
    Disabled,
}

/// Summary of one `flush` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushOutcome {
    pub chunks_sent: usize,
    pub events_sent: usize,
    pub chunks_failed: usize,
    pub events_lost: usize,
    /// Drain loop passes, including coalesced continuations
    pub passes: usize,
    pub stop: FlushStop,
}

impl FlushOutcome {
    fn stopped(stop: FlushStop) -> Self {
        Self {
            stop,
            ..Self::default()
        }
    }
}

/// Counters exposed to diagnostics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub lifecycle: LifecyclePhase,
    pub admitted: u64,
    pub sampled_out: u64,
    pub untrackable: u64,
    pub evicted: u64,
    pub chunks_sent: u64,
    pub chunks_failed: u64,
    pub events_sent: u64,
    pub events_lost: u64,
    /// Count-triggered flush tasks spawned by `record`
    pub flushes_scheduled: u64,
    pub queue_len: usize,
    pub next_sequence: u64,
    pub call_mode: bool,
    pub sampling: SamplingState,
}

struct PipelineState {
    queue: EventQueue,
    gate: SamplingGate,
    cursor: FlushCursor,
    next_sequence: u64,
    subject_id: Option<String>,
    lifecycle: LifecyclePhase,
    stop_handle: Option<StopHandle>,
    timer: Option<JoinHandle<()>>,
    runtime: Option<Handle>,
    stats: PipelineStats,
}

pub struct TelemetryPipeline {
    config: PipelineConfig,
    filter: TrackabilityFilter,
    identity: SessionIdentity,
    capture: Arc<dyn CaptureLibrary>,
    sink: Arc<dyn ReplaySink>,
    hub: TelemetryHub,
    state: Mutex<PipelineState>,
    init: OnceCell<()>,
    self_ref: Weak<TelemetryPipeline>,
}

impl TelemetryPipeline {
    pub fn new(config: PipelineConfig, deps: PipelineDeps) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            filter: TrackabilityFilter::new(&config.routes),
            identity: SessionIdentity::new(deps.session_store),
            capture: deps.capture,
            sink: deps.sink,
            hub: TelemetryHub::default(),
            state: Mutex::new(PipelineState {
                queue: EventQueue::new(config.queue.max_queue_events),
                gate: SamplingGate::new(&config.sampling),
                cursor: FlushCursor::default(),
                next_sequence: 0,
                subject_id: None,
                lifecycle: LifecyclePhase::Uninitialized,
                stop_handle: None,
                timer: None,
                runtime: None,
                stats: PipelineStats::default(),
            }),
            init: OnceCell::new(),
            self_ref: self_ref.clone(),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn hub(&self) -> &TelemetryHub {
        &self.hub
    }

    pub fn session_id(&self) -> &str {
        self.identity.get_session_id()
    }

    pub fn is_trackable(&self, path: &str) -> bool {
        self.filter.is_trackable(path)
    }

    pub fn lifecycle(&self) -> LifecyclePhase {
        self.state().lifecycle
    }

    pub fn queue_len(&self) -> usize {
        self.state().queue.size()
    }

    /// Subject the chunks are attributed to; flushing waits until one is set.
    pub fn set_subject_id(&self, subject_id: Option<String>) {
        self.state().subject_id = subject_id.filter(|id| !id.is_empty());
    }

    pub fn stats(&self) -> PipelineStats {
        let state = self.state();
        let mut stats = state.stats.clone();
        stats.lifecycle = state.lifecycle;
        stats.queue_len = state.queue.size();
        stats.next_sequence = state.next_sequence;
        stats.call_mode = state.gate.call_mode();
        stats.sampling = state.gate.state().clone();
        stats
    }

    fn state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("[ReplayPipeline] State lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn set_lifecycle(&self, phase: LifecyclePhase) {
        self.state().lifecycle = phase;
        self.hub.record_lifecycle(phase);
    }

    // ========================================================================
    // SAMPLING STATE
    // ========================================================================

    pub(crate) fn update_path(&self, path: &str) {
        self.state().gate.on_path_change(path);
    }

    pub(crate) fn set_call_active(&self, active: bool) {
        self.state().gate.on_call_state_change(active);
    }

    pub fn sampling_state(&self) -> SamplingState {
        self.state().gate.state().clone()
    }

    // ========================================================================
    // ADMISSION
    // ========================================================================

    /// Entry point for every event the recorder emits.
    ///
    /// Synchronous: filter, gate and enqueue, then schedule an immediate
    /// flush once the queue reaches the flush threshold.
    pub fn record(&self, event: CapturedEvent) {
        if !self.config.enabled {
            return;
        }

        let spawn_flush = {
            let mut state = self.state();

            if !self.filter.is_trackable(&state.gate.state().current_path) {
                state.stats.untrackable += 1;
                self.hub.record_drop(DropReason::Untrackable, 1);
                return;
            }

            if !state.gate.should_admit(&event) {
                state.stats.sampled_out += 1;
                self.hub.record_drop(DropReason::Sampled, 1);
                return;
            }

            state.stats.admitted += 1;
            let evicted = state.queue.push(event);
            if evicted > 0 {
                state.stats.evicted += evicted as u64;
                self.hub.record_eviction(evicted);
                debug!("[ReplayPipeline] Queue full, evicted {} oldest events", evicted);
            }
            self.hub
                .record_queue_occupancy(state.queue.size(), state.queue.capacity());

            if state.queue.size() < self.config.chunk.flush_event_count {
                false
            } else if state.cursor.is_flushing {
                state.cursor.flush_requested = true;
                false
            } else if state.cursor.flush_scheduled {
                false
            } else {
                state.cursor.flush_scheduled = true;
                state.stats.flushes_scheduled += 1;
                true
            }
        };

        if spawn_flush && self.spawn_flush().is_none() {
            self.state().cursor.flush_scheduled = false;
        }
    }

    fn spawn_flush(&self) -> Option<JoinHandle<FlushOutcome>> {
        let runtime = self.state().runtime.clone()?;
        let pipeline = self.self_ref.upgrade()?;
        Some(runtime.spawn(async move { pipeline.flush().await }))
    }

    // ========================================================================
    // FLUSH SCHEDULER
    // ========================================================================

    /// Drain the queue into chunks and transmit them.
    ///
    /// A call made while another flush is running only sets the pending
    /// request flag; the running flush performs at most one continuation.
    pub async fn flush(&self) -> FlushOutcome {
        if !self.config.enabled {
            return FlushOutcome::stopped(FlushStop::Disabled);
        }

        {
            let mut state = self.state();
            state.cursor.flush_scheduled = false;
            if state.cursor.is_flushing {
                state.cursor.flush_requested = true;
                return FlushOutcome::stopped(FlushStop::Coalesced);
            }
            state.cursor.is_flushing = true;
            state.cursor.flush_requested = false;
        }

        let mut outcome = FlushOutcome::default();
        loop {
            outcome.passes += 1;
            let stop = self.drain_pass(&mut outcome).await;

            let mut state = self.state();
            if state.cursor.flush_requested {
                state.cursor.flush_requested = false;
                continue;
            }
            state.cursor.is_flushing = false;
            outcome.stop = stop;
            break;
        }

        if outcome.chunks_sent > 0 || outcome.chunks_failed > 0 {
            debug!(
                "[FlushScheduler] Flush finished: sent={} failed={} stop={:?}",
                outcome.chunks_sent, outcome.chunks_failed, outcome.stop
            );
        }
        outcome
    }

    async fn drain_pass(&self, outcome: &mut FlushOutcome) -> FlushStop {
        let max_count = self.config.chunk.flush_event_count.max(1);
        let max_bytes = self.config.chunk.max_chunk_bytes;

        loop {
            let (chunk, subject_id) = {
                let mut state = self.state();
                if state.queue.is_empty() {
                    return FlushStop::Drained;
                }
                let Some(subject_id) = state.subject_id.clone() else {
                    return FlushStop::NoIdentity;
                };

                let drained = state.queue.drain_up_to(max_count, max_bytes);
                if drained.is_empty() {
                    return FlushStop::Drained;
                }
                let sequence = state.next_sequence;
                state.next_sequence += 1;

                let sampling = state.gate.state();
                let chunk = Chunk {
                    session_id: self.identity.get_session_id().to_string(),
                    sequence,
                    path_at_flush: sampling.current_path.clone(),
                    page_label_at_flush: sampling.current_page_label.clone(),
                    events: drained.events,
                    bytes: drained.bytes,
                };
                (chunk, subject_id)
            };

            let sequence = chunk.sequence;
            let events = chunk.len();
            let bytes = chunk.bytes;
            let row = chunk.into_row(&subject_id, &self.config.envelope);

            if let Err(err) = self.sink.insert(row).await {
                log_transport_error(&err, "flush");
                {
                    let mut state = self.state();
                    state.stats.chunks_failed += 1;
                    state.stats.events_lost += events as u64;
                }
                self.hub.record_chunk_failed(sequence, events, err.code());
                outcome.chunks_failed += 1;
                outcome.events_lost += events;
                return FlushStop::TransmissionFailed;
            }

            self.hub.record_chunk_sent(sequence, events, bytes);
            outcome.chunks_sent += 1;
            outcome.events_sent += events;

            let mut state = self.state();
            state.stats.chunks_sent += 1;
            state.stats.events_sent += events as u64;

            if state.queue.is_empty() {
                return FlushStop::Drained;
            }
            if state.queue.size() >= max_count {
                continue;
            }
            if state.cursor.flush_requested {
                state.cursor.flush_requested = false;
                continue;
            }
            return FlushStop::BelowThreshold;
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Start the recorder once per tab.
    ///
    /// Concurrent callers share one in-flight start; a failed start leaves
    /// the pipeline uninitialized so the next call retries.
    pub async fn ensure_initialized(&self) -> Result<(), PipelineError> {
        if !self.config.enabled {
            return Err(PipelineError::Disabled);
        }
        self.init
            .get_or_try_init(|| self.start_capture())
            .await
            .map(|_| ())
    }

    async fn start_capture(&self) -> Result<(), PipelineError> {
        self.set_lifecycle(LifecyclePhase::Initializing);

        let weak = self.self_ref.clone();
        let emit: EventEmitter = Arc::new(move |event| {
            if let Some(pipeline) = weak.upgrade() {
                pipeline.record(event);
            }
        });

        match self.capture.start(self.config.capture.clone(), emit).await {
            Ok(stop_handle) => {
                let runtime = Handle::try_current().ok();
                if runtime.is_none() {
                    warn!("[ReplayPipeline] No tokio runtime, periodic flushing disabled");
                }
                let timer = runtime.as_ref().map(|runtime| self.spawn_timer(runtime));
                {
                    let mut state = self.state();
                    state.stop_handle = Some(stop_handle);
                    state.runtime = runtime;
                    state.timer = timer;
                }
                self.set_lifecycle(LifecyclePhase::Active);
                info!(
                    "[ReplayPipeline] Recording started (session {}, flush every {:?})",
                    self.identity.get_session_id(),
                    self.config.chunk.flush_interval()
                );
                Ok(())
            }
            Err(err) => {
                log_capture_error(&err, "ensure_initialized");
                self.set_lifecycle(LifecyclePhase::Uninitialized);
                Err(err.into())
            }
        }
    }

    fn spawn_timer(&self, runtime: &Handle) -> JoinHandle<()> {
        let weak = self.self_ref.clone();
        let period = self.config.chunk.flush_interval();

        runtime.spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut ticks = IntervalStream::new(interval);

            while ticks.next().await.is_some() {
                let Some(pipeline) = weak.upgrade() else {
                    break;
                };
                pipeline.flush().await;
            }
        })
    }

    /// Forward a marker to the recorder; no-op until recording is active.
    pub fn add_marker(&self, tag: &str, payload: Value) {
        if self.config.enabled && self.lifecycle() == LifecyclePhase::Active {
            self.capture.add_custom_event(tag, payload);
        }
    }

    /// Ask the recorder for a checkpoint snapshot; no-op until recording is active.
    pub fn request_checkpoint(&self) {
        if self.config.enabled && self.lifecycle() == LifecyclePhase::Active {
            self.capture.take_full_snapshot(true);
        }
    }

    fn stop_recording(&self) {
        let (stop_handle, timer) = {
            let mut state = self.state();
            if state.lifecycle == LifecyclePhase::Active {
                state.lifecycle = LifecyclePhase::TornDown;
            }
            (state.stop_handle.take(), state.timer.take())
        };

        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(stop_handle) = stop_handle {
            stop_handle.stop();
            self.hub.record_lifecycle(LifecyclePhase::TornDown);
            info!("[ReplayPipeline] Recording stopped");
        }
    }

    /// Page-teardown hook: stop recording and fire one last flush without waiting.
    pub fn teardown(&self) -> Option<JoinHandle<FlushOutcome>> {
        if !self.config.enabled {
            return None;
        }
        self.stop_recording();
        self.spawn_flush()
    }

    /// Teardown variant that awaits the final flush.
    pub async fn teardown_and_wait(&self) -> FlushOutcome {
        if !self.config.enabled {
            return FlushOutcome::stopped(FlushStop::Disabled);
        }
        self.stop_recording();
        self.flush().await
    }
}

#[cfg(test)]
mod tests;
