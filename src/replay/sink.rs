//! Remote persistence boundary.
//!
//! A sink accepts one row per chunk and reports success or failure. The
//! pipeline never retries; what a sink rejects is gone.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::TransportError;
use crate::replay::chunk::ReplayRow;

/// Batch-insert endpoint for replay rows
pub trait ReplaySink: Send + Sync {
    fn insert(&self, row: ReplayRow) -> BoxFuture<'_, Result<(), TransportError>>;
}

/// Records rows in memory; failures can be scripted per call.
#[derive(Debug, Default)]
pub struct MemorySink {
    rows: Mutex<Vec<ReplayRow>>,
    scripted: Mutex<VecDeque<Result<(), TransportError>>>,
    attempts: Mutex<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next insert call (FIFO); unscripted calls succeed.
    pub fn script(&self, outcome: Result<(), TransportError>) {
        if let Ok(mut scripted) = self.scripted.lock() {
            scripted.push_back(outcome);
        }
    }

    pub fn rows(&self) -> Vec<ReplayRow> {
        self.rows.lock().map(|rows| rows.clone()).unwrap_or_default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().map(|n| *n).unwrap_or(0)
    }
}

impl ReplaySink for MemorySink {
    fn insert(&self, row: ReplayRow) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            if let Ok(mut attempts) = self.attempts.lock() {
                *attempts += 1;
            }
            let outcome = self
                .scripted
                .lock()
                .ok()
                .and_then(|mut scripted| scripted.pop_front())
                .unwrap_or(Ok(()));
            outcome?;
            self.rows
                .lock()
                .map_err(|_| TransportError::Closed)?
                .push(row);
            Ok(())
        })
    }
}

impl<S: ReplaySink + ?Sized> ReplaySink for Arc<S> {
    fn insert(&self, row: ReplayRow) -> BoxFuture<'_, Result<(), TransportError>> {
        (**self).insert(row)
    }
}

/// Appends each row as one JSON line to a file.
pub struct JsonLinesSink {
    path: PathBuf,
    lock: AsyncMutex<()>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: AsyncMutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReplaySink for JsonLinesSink {
    fn insert(&self, row: ReplayRow) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let mut line = serde_json::to_vec(&row)?;
            line.push(b'\n');

            let _guard = self.lock.lock().await;
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(&line).await?;
            file.flush().await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvelopeConfig;
    use crate::replay::chunk::Chunk;
    use crate::replay::event::CapturedEvent;
    use serde_json::Value;

    fn row(sequence: u64) -> ReplayRow {
        Chunk {
            session_id: "s".to_string(),
            sequence,
            path_at_flush: "/practice".to_string(),
            page_label_at_flush: "Practice".to_string(),
            events: vec![CapturedEvent::custom("m", sequence, Value::Null)],
            bytes: 0,
        }
        .into_row("subject", &EnvelopeConfig::default())
    }

    #[tokio::test]
    async fn memory_sink_applies_scripted_failures_in_order() {
        let sink = MemorySink::new();
        sink.script(Err(TransportError::Closed));

        assert_eq!(sink.insert(row(1)).await, Err(TransportError::Closed));
        assert!(sink.insert(row(2)).await.is_ok());

        let rows = sink.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].metadata.sequence, 2);
        assert_eq!(sink.attempts(), 2);
    }

    #[tokio::test]
    async fn json_lines_sink_appends_rows() {
        let path = std::env::temp_dir().join(format!(
            "replay-sink-{}-{}.jsonl",
            std::process::id(),
            crate::replay::identity::generate_session_id()
        ));
        let sink = JsonLinesSink::new(&path);
        sink.insert(row(1)).await.unwrap();
        sink.insert(row(2)).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: Vec<ReplayRow> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].metadata.sequence, 2);

        let _ = tokio::fs::remove_file(&path).await;
    }
}
