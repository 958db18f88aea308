//! Chunk envelope and the row persisted by the remote endpoint.

use serde::{Deserialize, Serialize};

use crate::config::EnvelopeConfig;
use crate::replay::event::CapturedEvent;

/// Event type column value for replay rows
pub const REPLAY_EVENT_TYPE: &str = "session_replay_chunk";

/// A bounded batch of events plus envelope, transmitted once
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub session_id: String,
    /// Process-wide, incremented once per chunk built
    pub sequence: u64,
    pub path_at_flush: String,
    pub page_label_at_flush: String,
    pub events: Vec<CapturedEvent>,
    /// Estimated serialized size of `events`
    pub bytes: usize,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Wrap the chunk into the row format for `subject_id`.
    pub fn into_row(self, subject_id: &str, envelope: &EnvelopeConfig) -> ReplayRow {
        ReplayRow {
            subject_id: subject_id.to_string(),
            call_id: None,
            page_label: self.page_label_at_flush.clone(),
            event_type: REPLAY_EVENT_TYPE.to_string(),
            metadata: ChunkMetadata {
                version: envelope.version,
                format: envelope.format.clone(),
                session_id: self.session_id,
                sequence: self.sequence,
                path: self.path_at_flush,
                page_label: self.page_label_at_flush,
                events: self.events,
            },
        }
    }
}

/// One inserted row; no partial-row semantics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayRow {
    pub subject_id: String,
    pub call_id: Option<String>,
    pub page_label: String,
    pub event_type: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub version: u32,
    pub format: String,
    pub session_id: String,
    pub sequence: u64,
    pub path: String,
    pub page_label: String,
    pub events: Vec<CapturedEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn row_matches_wire_shape() {
        let chunk = Chunk {
            session_id: "sess-1".to_string(),
            sequence: 3,
            path_at_flush: "/practice".to_string(),
            page_label_at_flush: "Practice".to_string(),
            events: vec![CapturedEvent::custom("route-change", 5, Value::Null)],
            bytes: 64,
        };

        let row = chunk.into_row("subject-9", &EnvelopeConfig::default());
        let value = serde_json::to_value(&row).unwrap();

        assert_eq!(value["subject_id"], "subject-9");
        assert!(value["call_id"].is_null());
        assert_eq!(value["event_type"], REPLAY_EVENT_TYPE);
        assert_eq!(value["page_label"], "Practice");
        assert_eq!(value["metadata"]["sessionId"], "sess-1");
        assert_eq!(value["metadata"]["sequence"], 3);
        assert_eq!(value["metadata"]["pageLabel"], "Practice");
        assert_eq!(value["metadata"]["format"], "rrweb");
        assert_eq!(value["metadata"]["events"].as_array().map(Vec::len), Some(1));
    }
}
