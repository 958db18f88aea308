use super::*;
use crate::error::TransportError;
use crate::replay::capture::LoopbackCapture;
use crate::replay::chunk::ReplayRow;
use crate::replay::event::SourceCategory;
use crate::replay::identity::InMemorySessionStore;
use crate::replay::queue::tests::sized_event;
use crate::replay::sink::MemorySink;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.chunk.flush_interval_ms = 60_000;
    config
}

fn build(
    config: PipelineConfig,
    sink: Arc<dyn ReplaySink>,
) -> (Arc<TelemetryPipeline>, LoopbackCapture) {
    let capture = LoopbackCapture::new();
    let pipeline = TelemetryPipeline::new(
        config,
        PipelineDeps {
            capture: Arc::new(capture.clone()),
            sink,
            session_store: Arc::new(InMemorySessionStore::new()),
        },
    );
    (pipeline, capture)
}

fn pointer(ts: u64) -> CapturedEvent {
    CapturedEvent::incremental(SourceCategory::PointerMove, ts, Value::Null)
}

fn marker(ts: u64) -> CapturedEvent {
    CapturedEvent::custom("marker", ts, Value::Null)
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Sink that parks every insert until released, tracking overlap.
struct GatedSink {
    entered: Notify,
    release: Semaphore,
    active: AtomicUsize,
    max_active: AtomicUsize,
    rows: std::sync::Mutex<Vec<ReplayRow>>,
}

impl GatedSink {
    fn new() -> Self {
        Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            rows: std::sync::Mutex::new(Vec::new()),
        }
    }
}

impl ReplaySink for GatedSink {
    fn insert(&self, row: ReplayRow) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            self.entered.notify_one();
            if let Ok(permit) = self.release.acquire().await {
                permit.forget();
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.rows.lock().unwrap().push(row);
            Ok(())
        })
    }
}

#[test]
fn events_before_navigation_are_untrackable() {
    let (pipeline, _) = build(test_config(), Arc::new(MemorySink::new()));
    pipeline.record(marker(1));
    assert_eq!(pipeline.queue_len(), 0);
    assert_eq!(pipeline.stats().untrackable, 1);
}

#[test]
fn excluded_path_drops_events() {
    let (pipeline, _) = build(test_config(), Arc::new(MemorySink::new()));
    pipeline.update_path("/researcher/dashboard");
    pipeline.record(marker(1));
    assert_eq!(pipeline.queue_len(), 0);
    assert_eq!(pipeline.hub().drop_count(DropReason::Untrackable), 1);
}

#[test]
fn gate_thins_pointer_stream_by_duration() {
    let (pipeline, _) = build(test_config(), Arc::new(MemorySink::new()));
    pipeline.update_path("/survey");

    for i in 0..45u64 {
        pipeline.record(pointer(10_000 + i * 10));
    }

    // 45 events × 10 ms = 450 ms; ceil(450 / 110) = 5
    assert_eq!(pipeline.queue_len(), 5);
    let stats = pipeline.stats();
    assert_eq!(stats.admitted, 5);
    assert_eq!(stats.sampled_out, 40);
}

#[test]
fn queue_never_exceeds_cap() {
    let mut config = test_config();
    config.queue.max_queue_events = 10;
    config.chunk.flush_event_count = 1_000;
    let (pipeline, _) = build(config, Arc::new(MemorySink::new()));
    pipeline.update_path("/survey");

    for ts in 0..50 {
        pipeline.record(marker(ts));
        assert!(pipeline.queue_len() <= 10);
    }
    assert_eq!(pipeline.stats().evicted, 40);
}

#[tokio::test]
async fn flush_without_subject_keeps_events() {
    let sink = Arc::new(MemorySink::new());
    let (pipeline, _) = build(test_config(), sink.clone());
    pipeline.update_path("/survey");
    pipeline.record(marker(1));

    let outcome = pipeline.flush().await;
    assert_eq!(outcome.stop, FlushStop::NoIdentity);
    assert_eq!(pipeline.queue_len(), 1);
    assert_eq!(sink.attempts(), 0);

    pipeline.set_subject_id(Some("subject-1".to_string()));
    let outcome = pipeline.flush().await;
    assert_eq!(outcome.stop, FlushStop::Drained);
    assert_eq!(outcome.events_sent, 1);
    assert_eq!(sink.rows()[0].subject_id, "subject-1");
}

#[tokio::test]
async fn flush_builds_bounded_chunks_with_increasing_sequence() {
    let mut config = test_config();
    config.chunk.flush_event_count = 4;
    let sink = Arc::new(MemorySink::new());
    let (pipeline, _) = build(config, sink.clone());
    pipeline.update_path("/practice");
    pipeline.set_subject_id(Some("subject".to_string()));

    for ts in 0..9 {
        pipeline.record(marker(ts));
    }

    let outcome = pipeline.flush().await;
    // 4 + 4 sent, the remaining single event is below threshold
    assert_eq!(outcome.chunks_sent, 2);
    assert_eq!(outcome.stop, FlushStop::BelowThreshold);
    assert_eq!(pipeline.queue_len(), 1);

    pipeline.flush().await;
    let rows = sink.rows();
    let sequences: Vec<u64> = rows.iter().map(|row| row.metadata.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
    for row in &rows {
        assert!(!row.metadata.events.is_empty() && row.metadata.events.len() <= 4);
        assert_eq!(row.metadata.path, "/practice");
        assert_eq!(row.page_label, "Practice");
        assert_eq!(row.metadata.session_id, pipeline.session_id());
    }
}

#[tokio::test]
async fn oversized_event_ships_alone() {
    let mut config = test_config();
    config.chunk.max_chunk_bytes = 700_000;
    let sink = Arc::new(MemorySink::new());
    let (pipeline, _) = build(config, sink.clone());
    pipeline.update_path("/survey");
    pipeline.set_subject_id(Some("subject".to_string()));

    pipeline.record(sized_event(100, 1));
    pipeline.record(sized_event(100, 2));
    pipeline.record(sized_event(800_000, 3));

    pipeline.flush().await;
    pipeline.flush().await;

    let rows = sink.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].metadata.events.len(), 2);
    assert_eq!(rows[1].metadata.events.len(), 1);
    assert_eq!(rows[1].metadata.events[0].timestamp, 3);
}

#[tokio::test]
async fn transmission_failure_drops_chunk_and_stops_loop() {
    let mut config = test_config();
    config.chunk.flush_event_count = 2;
    let sink = Arc::new(MemorySink::new());
    sink.script(Err(TransportError::Rejected {
        status: 500,
        reason: "boom".to_string(),
    }));
    let (pipeline, _) = build(config, sink.clone());
    pipeline.update_path("/survey");
    pipeline.set_subject_id(Some("subject".to_string()));
    for ts in 0..4 {
        pipeline.record(marker(ts));
    }

    let outcome = pipeline.flush().await;
    assert_eq!(outcome.stop, FlushStop::TransmissionFailed);
    assert_eq!(outcome.chunks_failed, 1);
    assert_eq!(outcome.events_lost, 2);
    assert_eq!(pipeline.queue_len(), 2);

    let outcome = pipeline.flush().await;
    assert_eq!(outcome.chunks_sent, 1);
    let rows = sink.rows();
    assert_eq!(rows.len(), 1);
    // Sequence 0 was consumed by the failed chunk
    assert_eq!(rows[0].metadata.sequence, 1);
    assert_eq!(rows[0].metadata.events[0].timestamp, 2);

    let stats = pipeline.stats();
    assert_eq!(stats.events_lost, 2);
    assert_eq!(pipeline.hub().drop_count(DropReason::TransmissionFailed), 2);
}

#[tokio::test]
async fn concurrent_flush_requests_coalesce_into_running_loop() {
    let sink = Arc::new(GatedSink::new());
    let (pipeline, _) = build(test_config(), sink.clone());
    pipeline.update_path("/survey");
    pipeline.set_subject_id(Some("subject".to_string()));
    for ts in 0..3 {
        pipeline.record(marker(ts));
    }

    let running = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.flush().await })
    };
    sink.entered.notified().await;

    assert_eq!(pipeline.flush().await.stop, FlushStop::Coalesced);
    assert_eq!(pipeline.flush().await.stop, FlushStop::Coalesced);
    pipeline.record(marker(10));
    pipeline.record(marker(11));

    sink.release.add_permits(16);
    let outcome = running.await.unwrap();

    assert_eq!(outcome.chunks_sent, 2);
    assert_eq!(outcome.events_sent, 5);
    assert_eq!(outcome.stop, FlushStop::Drained);
    assert_eq!(sink.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.queue_len(), 0);
}

#[tokio::test]
async fn pending_request_runs_exactly_one_continuation() {
    let sink = Arc::new(GatedSink::new());
    let (pipeline, _) = build(test_config(), sink.clone());
    pipeline.update_path("/survey");
    pipeline.set_subject_id(Some("subject".to_string()));
    pipeline.record(marker(1));

    let running = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.flush().await })
    };
    sink.entered.notified().await;

    for _ in 0..5 {
        assert_eq!(pipeline.flush().await.stop, FlushStop::Coalesced);
    }

    sink.release.add_permits(16);
    let outcome = running.await.unwrap();
    assert_eq!(outcome.passes, 2);
    assert_eq!(outcome.chunks_sent, 1);

    // Cursor released: a fresh flush runs on its own
    assert_eq!(pipeline.flush().await.passes, 1);
}

#[tokio::test]
async fn reaching_flush_threshold_triggers_immediate_flush() {
    let mut config = test_config();
    config.chunk.flush_event_count = 5;
    let sink = Arc::new(MemorySink::new());
    let (pipeline, capture) = build(config, sink.clone());
    pipeline.update_path("/survey");
    pipeline.set_subject_id(Some("subject".to_string()));
    pipeline.ensure_initialized().await.unwrap();

    for ts in 0..4 {
        assert!(capture.emit(marker(ts)));
    }
    settle().await;
    assert!(sink.rows().is_empty());

    capture.emit(marker(4));
    settle().await;
    let rows = sink.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].metadata.events.len(), 5);
}

#[tokio::test]
async fn burst_above_threshold_schedules_one_flush() {
    let mut config = test_config();
    config.chunk.flush_event_count = 5;
    let sink = Arc::new(MemorySink::new());
    let (pipeline, capture) = build(config, sink.clone());
    pipeline.update_path("/survey");
    pipeline.set_subject_id(Some("subject".to_string()));
    pipeline.ensure_initialized().await.unwrap();

    // No yield between emits: the scheduled task cannot run yet
    for ts in 0..100 {
        assert!(capture.emit(marker(ts)));
    }
    assert_eq!(pipeline.stats().flushes_scheduled, 1);

    settle().await;
    assert_eq!(sink.rows().len(), 20);
    assert_eq!(pipeline.queue_len(), 0);

    // Once the scheduled flush has run, the next threshold crossing schedules again
    for ts in 100..105 {
        capture.emit(marker(ts));
    }
    assert_eq!(pipeline.stats().flushes_scheduled, 2);
    settle().await;
    assert_eq!(sink.rows().len(), 21);
}

#[tokio::test(start_paused = true)]
async fn periodic_timer_flushes_partial_queue() {
    let mut config = test_config();
    config.chunk.flush_interval_ms = 1_000;
    let sink = Arc::new(MemorySink::new());
    let (pipeline, capture) = build(config, sink.clone());
    pipeline.update_path("/survey");
    pipeline.set_subject_id(Some("subject".to_string()));
    pipeline.ensure_initialized().await.unwrap();

    capture.emit(marker(1));
    tokio::time::sleep(Duration::from_millis(500)).await;
    settle().await;
    assert!(sink.rows().is_empty());

    tokio::time::sleep(Duration::from_millis(600)).await;
    settle().await;
    assert_eq!(sink.rows().len(), 1);
}

#[tokio::test]
async fn failed_start_is_retried() {
    let (pipeline, capture) = build(test_config(), Arc::new(MemorySink::new()));
    capture.fail_next_starts(1);

    let err = pipeline.ensure_initialized().await.unwrap_err();
    assert!(matches!(err, PipelineError::Capture(_)));
    assert_eq!(pipeline.lifecycle(), LifecyclePhase::Uninitialized);

    pipeline.ensure_initialized().await.unwrap();
    assert_eq!(pipeline.lifecycle(), LifecyclePhase::Active);
    assert_eq!(capture.start_count(), 2);
}

#[tokio::test]
async fn concurrent_initialization_starts_once() {
    let (pipeline, capture) = build(test_config(), Arc::new(MemorySink::new()));
    let (a, b) = tokio::join!(pipeline.ensure_initialized(), pipeline.ensure_initialized());
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(capture.start_count(), 1);
    assert!(capture.options().is_some());
}

#[tokio::test]
async fn teardown_stops_recorder_and_flushes() {
    let sink = Arc::new(MemorySink::new());
    let (pipeline, capture) = build(test_config(), sink.clone());
    pipeline.update_path("/survey");
    pipeline.set_subject_id(Some("subject".to_string()));
    pipeline.ensure_initialized().await.unwrap();
    capture.emit(marker(1));

    let final_flush = pipeline.teardown().expect("flush spawned");
    let outcome = final_flush.await.unwrap();

    assert_eq!(outcome.events_sent, 1);
    assert_eq!(capture.stop_count(), 1);
    assert!(!capture.is_recording());
    assert_eq!(pipeline.lifecycle(), LifecyclePhase::TornDown);
    assert_eq!(sink.rows().len(), 1);
}

#[tokio::test]
async fn disabled_pipeline_is_inert() {
    let mut config = test_config();
    config.enabled = false;
    let sink = Arc::new(MemorySink::new());
    let (pipeline, capture) = build(config, sink.clone());
    pipeline.update_path("/survey");
    pipeline.set_subject_id(Some("subject".to_string()));

    pipeline.record(marker(1));
    assert_eq!(pipeline.queue_len(), 0);
    assert_eq!(pipeline.flush().await.stop, FlushStop::Disabled);
    assert_eq!(
        pipeline.ensure_initialized().await,
        Err(PipelineError::Disabled)
    );
    assert_eq!(capture.start_count(), 0);
    assert!(pipeline.teardown().is_none());
}
