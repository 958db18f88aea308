//! Bounded FIFO of admitted events.
//!
//! Memory is capped: once `max_events` is exceeded the oldest events are
//! evicted. Draining removes a byte- and count-bounded prefix without ever
//! splitting an event.

use std::collections::VecDeque;

use crate::replay::event::CapturedEvent;

/// Serialized size of an event; serialization failure counts as oversized.
pub fn estimate_event_bytes(event: &CapturedEvent) -> usize {
    serde_json::to_vec(event)
        .map(|bytes| bytes.len())
        .unwrap_or(usize::MAX)
}

/// Prefix removed from the queue by one drain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainedEvents {
    pub events: Vec<CapturedEvent>,
    /// Sum of estimated serialized sizes
    pub bytes: usize,
}

impl DrainedEvents {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[derive(Debug)]
pub struct EventQueue {
    events: VecDeque<CapturedEvent>,
    max_events: usize,
}

impl EventQueue {
    pub fn new(max_events: usize) -> Self {
        let max_events = max_events.max(1);
        Self {
            events: VecDeque::with_capacity(max_events.min(4096)),
            max_events,
        }
    }

    /// Append at the tail; returns how many head entries were evicted.
    pub fn push(&mut self, event: CapturedEvent) -> usize {
        self.events.push_back(event);
        let overflow = self.events.len().saturating_sub(self.max_events);
        if overflow > 0 {
            self.events.drain(..overflow);
        }
        overflow
    }

    pub fn size(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_events
    }

    /// Remove up to `max_count` events from the head within `max_bytes`.
    ///
    /// A single event larger than `max_bytes` is taken alone so an oversized
    /// event can never stall the queue.
    pub fn drain_up_to(&mut self, max_count: usize, max_bytes: usize) -> DrainedEvents {
        let mut drained = DrainedEvents::default();

        while drained.len() < max_count {
            let Some(next) = self.events.front() else {
                break;
            };
            let size = estimate_event_bytes(next);

            if size > max_bytes {
                if drained.is_empty() {
                    if let Some(event) = self.events.pop_front() {
                        drained.events.push(event);
                        drained.bytes = size;
                    }
                }
                break;
            }

            let total = drained.bytes.saturating_add(size);
            if total > max_bytes && !drained.is_empty() {
                break;
            }

            if let Some(event) = self.events.pop_front() {
                drained.events.push(event);
                drained.bytes = total;
            }
        }

        drained
    }
}
