//! Captured event model.
//!
//! Events are opaque to the pipeline except for their kind, timestamp and,
//! for incremental changes, the source category that drives sampling.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Origin of an incremental change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceCategory {
    Mutation,
    PointerMove,
    MouseInteraction,
    Scroll,
    ViewportResize,
    Input,
    TouchMove,
    MediaInteraction,
    StyleSheetRule,
    CanvasMutation,
    Font,
    Drag,
    Selection,
}

/// Event discriminator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// Complete reconstructible DOM state
    FullSnapshot,
    /// Page metadata (viewport, href)
    Meta,
    /// Incremental change from a given source
    Incremental { source: SourceCategory },
    /// Application-defined marker
    Custom { tag: String },
}

/// One record emitted by the capture library.
///
/// Never mutated once admitted to the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapturedEvent {
    #[serde(flatten)]
    pub kind: EventKind,
    /// Wall clock, milliseconds since the Unix epoch
    pub timestamp: u64,
    #[serde(default)]
    pub data: Value,
}

impl CapturedEvent {
    pub fn new(kind: EventKind, timestamp: u64, data: Value) -> Self {
        Self {
            kind,
            timestamp,
            data,
        }
    }

    pub fn incremental(source: SourceCategory, timestamp: u64, data: Value) -> Self {
        Self::new(EventKind::Incremental { source }, timestamp, data)
    }

    pub fn custom(tag: impl Into<String>, timestamp: u64, payload: Value) -> Self {
        Self::new(EventKind::Custom { tag: tag.into() }, timestamp, payload)
    }

    pub fn full_snapshot(timestamp: u64, data: Value) -> Self {
        Self::new(EventKind::FullSnapshot, timestamp, data)
    }

    /// Source category for incremental events, `None` otherwise.
    pub fn source(&self) -> Option<SourceCategory> {
        match &self.kind {
            EventKind::Incremental { source } => Some(*source),
            _ => None,
        }
    }
}

pub(crate) fn now_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn incremental_event_serializes_flat() {
        let event = CapturedEvent::incremental(SourceCategory::PointerMove, 42, json!({"x": 1}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "incremental");
        assert_eq!(value["source"], "pointer_move");
        assert_eq!(value["timestamp"], 42);
        assert_eq!(value["data"]["x"], 1);
    }

    #[test]
    fn custom_event_parses_back() {
        let raw = r#"{"kind":"custom","tag":"route-change","timestamp":7,"data":{"path":"/practice"}}"#;
        let event: CapturedEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(
            event.kind,
            EventKind::Custom {
                tag: "route-change".to_string()
            }
        );
        assert_eq!(event.source(), None);
        assert_eq!(event.data["path"], "/practice");
    }
}
