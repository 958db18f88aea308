//! Adaptive sampling gate.
//!
//! High-frequency sources (pointer and scroll) are rate limited with a
//! minimum inter-emission interval per bucket. While a live call runs on a
//! call-bearing page the coarser call-active intervals apply.

use serde::Serialize;

use crate::config::{IntervalPair, SamplingConfig};
use crate::replay::event::{CapturedEvent, SourceCategory};
use crate::replay::routes::{normalize_path, page_label};

/// Sampling bucket an event falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventBucket {
    /// Pointer move, touch move, drag
    Pointer,
    Scroll,
    /// Always admitted (snapshots, markers, every other source)
    Unthrottled,
}

impl EventBucket {
    pub fn classify(event: &CapturedEvent) -> Self {
        match event.source() {
            Some(SourceCategory::PointerMove | SourceCategory::TouchMove | SourceCategory::Drag) => {
                EventBucket::Pointer
            }
            Some(SourceCategory::Scroll) => EventBucket::Scroll,
            _ => EventBucket::Unthrottled,
        }
    }
}

/// Application state the gate keys its intervals on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SamplingState {
    pub current_path: String,
    pub current_page_label: String,
    pub call_active: bool,
}

/// Per-bucket rate limiter; no queue and no I/O of its own
#[derive(Debug, Clone)]
pub struct SamplingGate {
    pointer: IntervalPair,
    scroll: IntervalPair,
    call_pages: Vec<String>,
    state: SamplingState,
    last_pointer_ms: Option<u64>,
    last_scroll_ms: Option<u64>,
}

impl SamplingGate {
    pub fn new(config: &SamplingConfig) -> Self {
        Self {
            pointer: config.pointer,
            scroll: config.scroll,
            call_pages: config.call_pages.clone(),
            state: SamplingState::default(),
            last_pointer_ms: None,
            last_scroll_ms: None,
        }
    }

    pub fn state(&self) -> &SamplingState {
        &self.state
    }

    pub fn on_path_change(&mut self, path: &str) {
        self.state.current_path = normalize_path(path).to_string();
        self.state.current_page_label = page_label(path);
    }

    pub fn on_call_state_change(&mut self, active: bool) {
        self.state.call_active = active;
    }

    /// Whether call-active intervals are in force
    pub fn call_mode(&self) -> bool {
        self.state.call_active
            && self
                .call_pages
                .iter()
                .any(|page| page == &self.state.current_path)
    }

    /// Minimum gap for a bucket under the current state, `None` when unthrottled.
    pub fn current_interval_ms(&self, bucket: EventBucket) -> Option<u64> {
        let pair = match bucket {
            EventBucket::Pointer => self.pointer,
            EventBucket::Scroll => self.scroll,
            EventBucket::Unthrottled => return None,
        };
        Some(if self.call_mode() {
            pair.call_active_ms
        } else {
            pair.default_ms
        })
    }

    /// Admit or drop an event, recording the emission time on admission.
    pub fn should_admit(&mut self, event: &CapturedEvent) -> bool {
        let bucket = EventBucket::classify(event);
        let Some(interval) = self.current_interval_ms(bucket) else {
            return true;
        };

        let last = match bucket {
            EventBucket::Pointer => &mut self.last_pointer_ms,
            EventBucket::Scroll => &mut self.last_scroll_ms,
            EventBucket::Unthrottled => return true,
        };

        // A timestamp behind the last emission counts as a zero gap
        let admit = match *last {
            None => true,
            Some(prev) => event.timestamp.saturating_sub(prev) >= interval,
        };
        if admit {
            *last = Some(event.timestamp);
        }
        admit
    }
}
