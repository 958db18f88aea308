//! Pipeline diagnostics collector.
//!
//! The collector keeps a bounded history of pipeline metrics plus an async
//! broadcast stream, and aggregates per-reason drop counters that would be
//! too chatty to publish one by one.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::{broadcast, mpsc};

use crate::replay::event::now_timestamp_ms;

pub mod events;

pub use events::{DropReason, LifecyclePhase, PipelineMetric};

/// Snapshot of collector state for HTTP/CLI reporting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TelemetrySnapshot {
    pub recent: Vec<PipelineMetric>,
    pub total_events: u64,
    pub dropped_events: u64,
    pub drops: HashMap<DropReason, u64>,
}

/// Broadcast-based collector retaining a bounded history of metrics.
pub struct TelemetryCollector {
    tx: broadcast::Sender<PipelineMetric>,
    history: Mutex<VecDeque<PipelineMetric>>,
    history_capacity: usize,
    total_events: AtomicU64,
    dropped_history: AtomicU64,
}

impl TelemetryCollector {
    pub fn new(buffer: usize, history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity: history_capacity.max(1),
            total_events: AtomicU64::new(0),
            dropped_history: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: PipelineMetric) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut history) = self.history.lock() {
            if history.len() == self.history_capacity {
                history.pop_front();
                self.dropped_history.fetch_add(1, Ordering::Relaxed);
            }
            history.push_back(event.clone());
        }

        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineMetric> {
        self.tx.subscribe()
    }

    /// Forward the broadcast stream into an unbounded channel.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe_unbounded(&self) -> mpsc::UnboundedReceiver<PipelineMetric> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut broadcast_rx = self.tx.subscribe();

        tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        rx
    }

    fn history(&self) -> (Vec<PipelineMetric>, u64, u64) {
        let recent = self
            .history
            .lock()
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default();
        (
            recent,
            self.total_events.load(Ordering::Relaxed),
            self.dropped_history.load(Ordering::Relaxed),
        )
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

/// Collector plus derived gauges and drop counters, one per pipeline.
pub struct TelemetryHub {
    collector: TelemetryCollector,
    last_occupancy: Mutex<Option<f32>>,
    drops: Mutex<HashMap<DropReason, u64>>,
}

impl TelemetryHub {
    pub fn new(channel_capacity: usize, history_capacity: usize) -> Self {
        Self {
            collector: TelemetryCollector::new(channel_capacity, history_capacity),
            last_occupancy: Mutex::new(None),
            drops: Mutex::new(HashMap::new()),
        }
    }

    pub fn collector(&self) -> &TelemetryCollector {
        &self.collector
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let (recent, total_events, dropped_events) = self.collector.history();
        let drops = self
            .drops
            .lock()
            .map(|drops| drops.clone())
            .unwrap_or_default();
        TelemetrySnapshot {
            recent,
            total_events,
            dropped_events,
            drops,
        }
    }

    pub fn record_drop(&self, reason: DropReason, count: u64) {
        if count == 0 {
            return;
        }
        if let Ok(mut drops) = self.drops.lock() {
            *drops.entry(reason).or_insert(0) += count;
        }
    }

    pub fn drop_count(&self, reason: DropReason) -> u64 {
        self.drops
            .lock()
            .ok()
            .and_then(|drops| drops.get(&reason).copied())
            .unwrap_or(0)
    }

    /// Publish queue occupancy, debounced to changes of at least 2.5 points.
    pub fn record_queue_occupancy(&self, len: usize, capacity: usize) {
        let percent = if capacity == 0 {
            0.0
        } else {
            (len as f32 / capacity as f32 * 100.0).clamp(0.0, 100.0)
        };

        let Ok(mut last) = self.last_occupancy.lock() else {
            return;
        };
        let should_emit = last
            .map(|previous| (previous - percent).abs() >= 2.5)
            .unwrap_or(true);

        if should_emit {
            *last = Some(percent);
            self.collector
                .publish(PipelineMetric::QueueOccupancy { percent });
        }
    }

    pub fn record_eviction(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.record_drop(DropReason::Evicted, count as u64);
        self.collector
            .publish(PipelineMetric::QueueEvicted { count });
    }

    pub fn record_chunk_sent(&self, sequence: u64, events: usize, bytes: usize) {
        self.collector.publish(PipelineMetric::ChunkSent {
            sequence,
            events,
            bytes,
        });
    }

    pub fn record_chunk_failed(&self, sequence: u64, events: usize, code: i32) {
        self.record_drop(DropReason::TransmissionFailed, events as u64);
        self.collector.publish(PipelineMetric::ChunkFailed {
            sequence,
            events,
            code,
        });
    }

    pub fn record_lifecycle(&self, phase: LifecyclePhase) {
        self.collector.publish(PipelineMetric::Lifecycle {
            phase,
            timestamp_ms: now_timestamp_ms(),
        });
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_preserves_order_within_history() {
        let collector = TelemetryCollector::new(8, 3);
        collector.publish(PipelineMetric::QueueEvicted { count: 1 });
        collector.publish(PipelineMetric::QueueEvicted { count: 2 });
        collector.publish(PipelineMetric::ChunkSent {
            sequence: 1,
            events: 4,
            bytes: 100,
        });

        let (recent, total, dropped) = collector.history();
        assert_eq!(recent.len(), 3);
        assert_eq!(total, 3);
        assert_eq!(dropped, 0);
        assert!(matches!(recent[0], PipelineMetric::QueueEvicted { count: 1 }));
        assert!(matches!(recent[2], PipelineMetric::ChunkSent { .. }));
    }

    #[test]
    fn collector_drops_history_when_full() {
        let collector = TelemetryCollector::new(8, 2);
        for count in 1..=3 {
            collector.publish(PipelineMetric::QueueEvicted { count });
        }

        let (recent, _, dropped) = collector.history();
        assert_eq!(recent.len(), 2);
        assert_eq!(dropped, 1);
        assert!(matches!(recent[0], PipelineMetric::QueueEvicted { count: 2 }));
    }

    #[test]
    fn occupancy_gauge_debounces_small_changes() {
        let hub = TelemetryHub::new(8, 16);
        hub.record_queue_occupancy(100, 1000);
        hub.record_queue_occupancy(105, 1000);
        hub.record_queue_occupancy(250, 1000);

        let occupancy = hub
            .snapshot()
            .recent
            .iter()
            .filter(|event| matches!(event, PipelineMetric::QueueOccupancy { .. }))
            .count();
        assert_eq!(occupancy, 2);
    }

    #[test]
    fn failures_and_evictions_feed_drop_counters() {
        let hub = TelemetryHub::default();
        hub.record_eviction(3);
        hub.record_chunk_failed(7, 12, 3001);
        hub.record_drop(DropReason::Sampled, 5);

        assert_eq!(hub.drop_count(DropReason::Evicted), 3);
        assert_eq!(hub.drop_count(DropReason::TransmissionFailed), 12);
        assert_eq!(hub.drop_count(DropReason::Sampled), 5);
        assert_eq!(hub.drop_count(DropReason::Untrackable), 0);
    }

    #[tokio::test]
    async fn unbounded_subscription_forwards_metrics() {
        let hub = TelemetryHub::default();
        let mut rx = hub.collector().subscribe_unbounded();
        tokio::task::yield_now().await;
        hub.record_lifecycle(LifecyclePhase::Active);

        let event = rx.recv().await.expect("metric forwarded");
        assert!(matches!(
            event,
            PipelineMetric::Lifecycle {
                phase: LifecyclePhase::Active,
                ..
            }
        ));
    }
}
