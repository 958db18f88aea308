use std::collections::BTreeMap;

use anyhow::{Context, Result};
use replay_pipeline::replay::{FlushOutcome, PipelineStats};
use replay_pipeline::telemetry::PipelineMetric;
use serde::Serialize;
use tokio::sync::broadcast::{error::TryRecvError, Receiver};

#[derive(Default)]
pub struct MetricAggregator {
    total_events: usize,
    lagged_events: usize,
    chunks: Vec<ChunkEntry>,
    peak_occupancy: f32,
    evicted: usize,
    lifecycle: Vec<LifecycleEntry>,
}

impl MetricAggregator {
    pub fn record(&mut self, metric: PipelineMetric) {
        self.total_events += 1;
        match metric {
            PipelineMetric::QueueOccupancy { percent } => {
                self.peak_occupancy = self.peak_occupancy.max(percent);
            }
            PipelineMetric::QueueEvicted { count } => self.evicted += count,
            PipelineMetric::ChunkSent {
                sequence,
                events,
                bytes,
            } => self.chunks.push(ChunkEntry {
                sequence,
                events,
                bytes: Some(bytes),
                failure_code: None,
            }),
            PipelineMetric::ChunkFailed {
                sequence,
                events,
                code,
            } => self.chunks.push(ChunkEntry {
                sequence,
                events,
                bytes: None,
                failure_code: Some(code),
            }),
            PipelineMetric::Lifecycle {
                phase,
                timestamp_ms,
            } => self.lifecycle.push(LifecycleEntry {
                phase: format!("{phase:?}"),
                timestamp_ms,
            }),
        }
    }

    pub fn lagged(&mut self, skipped: usize) {
        self.lagged_events += skipped;
    }

    pub fn into_report(
        mut self,
        session_id: String,
        stats: PipelineStats,
        final_flush: FlushOutcome,
        drops: BTreeMap<String, u64>,
    ) -> SimulationReport {
        self.chunks.sort_by_key(|chunk| chunk.sequence);
        SimulationReport {
            session_id,
            observed_metrics: self.total_events,
            lagged_metrics: self.lagged_events,
            peak_queue_percent: self.peak_occupancy,
            evicted_events: self.evicted,
            chunks: self.chunks,
            lifecycle_events: self.lifecycle,
            drops,
            final_flush,
            stats,
        }
    }
}

pub fn drain_metrics(rx: &mut Receiver<PipelineMetric>, aggregator: &mut MetricAggregator) {
    loop {
        match rx.try_recv() {
            Ok(metric) => aggregator.record(metric),
            Err(TryRecvError::Lagged(skipped)) => aggregator.lagged(skipped as usize),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub session_id: String,
    pub observed_metrics: usize,
    pub lagged_metrics: usize,
    pub peak_queue_percent: f32,
    pub evicted_events: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<ChunkEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lifecycle_events: Vec<LifecycleEntry>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub drops: BTreeMap<String, u64>,
    pub final_flush: FlushOutcome,
    pub stats: PipelineStats,
}

impl SimulationReport {
    pub fn print_json(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("serializing simulation report")?;
        println!("{json}");
        Ok(())
    }

    pub fn print_table(&self) {
        println!("Session                  : {}", self.session_id);
        println!(
            "Events admitted/sampled  : {} / {} (untrackable {})",
            self.stats.admitted, self.stats.sampled_out, self.stats.untrackable
        );
        println!(
            "Chunks sent/failed       : {} / {}",
            self.stats.chunks_sent, self.stats.chunks_failed
        );
        println!(
            "Events sent/lost         : {} / {}",
            self.stats.events_sent, self.stats.events_lost
        );
        println!(
            "Queue peak / evicted     : {:.1}% / {}",
            self.peak_queue_percent, self.evicted_events
        );
        println!(
            "Metrics observed         : {} (lagged {})",
            self.observed_metrics, self.lagged_metrics
        );
        println!(
            "Final flush              : {:?} after {} pass(es)",
            self.final_flush.stop, self.final_flush.passes
        );

        if !self.chunks.is_empty() {
            println!("Chunks                   :");
            for chunk in &self.chunks {
                match (chunk.bytes, chunk.failure_code) {
                    (Some(bytes), _) => println!(
                        "  - #{} {} events, {} bytes",
                        chunk.sequence, chunk.events, bytes
                    ),
                    (None, Some(code)) => println!(
                        "  - #{} {} events FAILED (code {})",
                        chunk.sequence, chunk.events, code
                    ),
                    (None, None) => println!("  - #{} {} events", chunk.sequence, chunk.events),
                }
            }
        }

        if !self.lifecycle_events.is_empty() {
            println!("Lifecycle events         :");
            for entry in &self.lifecycle_events {
                println!("  - {} @ {} ms", entry.phase, entry.timestamp_ms);
            }
        }

        if !self.drops.is_empty() {
            println!("Drops                    :");
            for (reason, count) in &self.drops {
                println!("  - {reason}: {count}");
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChunkEntry {
    pub sequence: u64,
    pub events: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct LifecycleEntry {
    pub phase: String,
    pub timestamp_ms: u64,
}
