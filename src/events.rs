// Copyright 2026 Gatecrash Contributors
// SPDX-License-Identifier: Apache-2.0

//! Engine event bus: typed events from every component.
//!
//! The EventBus is a `tokio::sync::broadcast` channel carrying
//! [`EngineEvent`] values. Any consumer (a TUI, a log sink, a test
//! harness) can subscribe independently. When no subscribers exist,
//! events are silently dropped (zero overhead). Core logic emits events
//! instead of relying on log text as a side channel; tests assert on
//! received events.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Every event the engine emits. Serialized to JSON for external sinks.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    // ── Run lifecycle ─────────────────────
    /// An acquisition run has started.
    RunStarted { catalog: String, list_url: String },
    /// The catalog list was fetched and diffed against acquired items.
    ListDiffed {
        catalog: String,
        items_total: usize,
        items_pending: usize,
    },
    /// A run finished (all pending items attempted).
    RunCompleted {
        catalog: String,
        items_completed: usize,
        items_abandoned: usize,
        items_skipped: usize,
        elapsed_ms: u64,
    },
    /// A run stopped early on a list-level challenge, terminal error, or
    /// cancellation. Completed items' artifacts are preserved.
    RunAborted { catalog: String, reason: String },

    // ── Fetch path ────────────────────────
    /// Transport attempt failed transiently; falling back to the browser.
    RenderFallback { url: String, reason: String },
    /// A transient failure was scheduled for retry.
    RetryScheduled {
        url: String,
        attempt: u32,
        delay_ms: u64,
    },

    // ── Challenge lifecycle ───────────────
    /// A challenge page was detected.
    ChallengeDetected {
        domain: String,
        url: String,
        status: u16,
        indicators: Vec<String>,
    },
    /// Stored bypass credentials were invalidated and removed as stale.
    CredentialsDiscarded { domain: String },
    /// The challenge URL was handed to a human for manual resolution.
    HandoffRequested { domain: String, url: String },

    // ── Per-item outcomes ─────────────────
    /// A sub-resource exhausted its retries and was skipped.
    SubResourceSkipped {
        item: String,
        url: String,
        attempts: u32,
    },
    /// An item was archived with at least one sub-resource.
    ItemArchived {
        item: String,
        sub_resources: usize,
        failed: usize,
    },
    /// Every sub-resource of an item failed; the item was abandoned.
    ItemAbandoned { item: String },
    /// An item was skipped before any sub-resource work (structural failure
    /// or exhausted retries on its sub-resource list).
    ItemSkipped { item: String, reason: String },
}

/// The central event bus for the engine.
///
/// All components emit events through this bus. Consumers subscribe
/// to receive a stream of all events.
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers. Silently ignores if no subscribers.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_roundtrip() {
        let event = EngineEvent::ChallengeDetected {
            domain: "example.com".to_string(),
            url: "https://example.com/list".to_string(),
            status: 503,
            indicators: vec!["status 503".to_string()],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("ChallengeDetected"));
        assert!(json.contains("example.com"));

        let parsed: EngineEvent = serde_json::from_str(&json).unwrap();
        match parsed {
            EngineEvent::ChallengeDetected { domain, status, .. } => {
                assert_eq!(domain, "example.com");
                assert_eq!(status, 503);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.emit(EngineEvent::RunStarted {
            catalog: "series-1".to_string(),
            list_url: "https://example.com/series-1".to_string(),
        });
    }

    #[test]
    fn test_subscribe_receives_emitted_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(EngineEvent::ItemAbandoned {
            item: "item003".to_string(),
        });

        match rx.try_recv().unwrap() {
            EngineEvent::ItemAbandoned { item } => assert_eq!(item, "item003"),
            _ => panic!("wrong event"),
        }
    }
}
