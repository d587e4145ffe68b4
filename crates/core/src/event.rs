//! Progress events: the append-only per-request log consumed by streamers.
//!
//! Events are keyed by correlation id and a monotonic sequence number that
//! the progress log assigns on append. Readers resume from their last seen
//! sequence; delivery is at-least-once and ordering is by `seq`, never by
//! arrival time.
//!
//! The [`EventBus`] is only a wake-up signal for live readers. The log is
//! the source of truth, so a lagged or disconnected subscriber loses nothing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::thread::CorrelationId;

/// The kind of a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// The request was accepted and is waiting for a worker
    Queued,
    /// A human-readable line describing the current stage
    Thinking,
    /// One sub-question reached a resolution state
    SubQuestion,
    /// Terminal: the turn was published
    Completed,
    /// Terminal: the turn could not be published normally
    Failed,
}

impl ProgressKind {
    /// Whether this kind terminates a stream.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Thinking => "thinking",
            Self::SubQuestion => "sub_question",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(Self::Queued),
            "thinking" => Some(Self::Thinking),
            "sub_question" => Some(Self::SubQuestion),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProgressKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One write-once entry in a correlation id's progress log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub correlation_id: CorrelationId,

    /// Monotonic per correlation id, starting at 1
    pub seq: u64,

    pub kind: ProgressKind,

    /// Kind-specific payload (a `{"line": ..}` object for `thinking`,
    /// the full turn response for `completed`)
    pub payload: serde_json::Value,

    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// The human-readable line carried by `thinking` events.
    pub fn line(&self) -> Option<&str> {
        self.payload.get("line").and_then(|v| v.as_str())
    }
}

/// A broadcast-based wake-up bus for newly appended progress events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Subscribers filter by correlation id.
pub struct EventBus {
    sender: broadcast::Sender<Arc<ProgressEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: ProgressEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ProgressEvent>> {
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

    fn event(seq: u64, kind: ProgressKind) -> ProgressEvent {
        ProgressEvent {
            correlation_id: CorrelationId::from("c-1"),
            seq,
            kind,
            payload: serde_json::json!({"line": "Planning sub-questions"}),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(event(3, ProgressKind::Thinking));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.seq, 3);
        assert_eq!(received.line(), Some("Planning sub-questions"));
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(event(1, ProgressKind::Queued));
    }

    #[test]
    fn terminal_kinds() {
        assert!(ProgressKind::Completed.is_terminal());
        assert!(ProgressKind::Failed.is_terminal());
        assert!(!ProgressKind::Thinking.is_terminal());
        assert_eq!(ProgressKind::parse("sub_question"), Some(ProgressKind::SubQuestion));
        assert_eq!(ProgressKind::parse("done"), None);
    }
}
