//! Domain events: what ingestion and the agent loop did, for anyone listening.
//!
//! Publishing never blocks and never fails. Events sent while nobody is
//! subscribed are dropped, and a slow subscriber sees `Lagged` rather than
//! holding up a conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Events kept in flight per subscriber before the oldest are dropped.
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// Startup ingestion filled the document store
    DocumentsIngested {
        sources: usize,
        chunks: usize,
        timestamp: DateTime<Utc>,
    },

    /// A run ended with a final assistant message
    ResponseGenerated {
        conversation_id: String,
        model: String,
        rounds: usize,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    ToolExecuted {
        conversation_id: String,
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A model call failed and the run was aborted
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::DocumentsIngested { timestamp, .. }
            | Self::ResponseGenerated { timestamp, .. }
            | Self::ToolExecuted { timestamp, .. }
            | Self::ErrorOccurred { timestamp, .. } => *timestamp,
        }
    }
}

/// Fan-out of [`DomainEvent`]s over `tokio::sync::broadcast`.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: DomainEvent) {
        // Err only means nobody is listening
        let _ = self.sender.send(Arc::new(event));
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(16);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(DomainEvent::ToolExecuted {
            conversation_id: "default".into(),
            tool_name: "retrieval_tool".into(),
            success: true,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        for rx in [&mut first, &mut second] {
            let event = rx.recv().await.unwrap();
            let DomainEvent::ToolExecuted { tool_name, success, .. } = event.as_ref() else {
                panic!("expected ToolExecuted, got {event:?}");
            };
            assert_eq!(tool_name, "retrieval_tool");
            assert!(success);
        }
    }

    #[test]
    fn publishing_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.publish(DomainEvent::DocumentsIngested {
            sources: 1,
            chunks: 3,
            timestamp: Utc::now(),
        });
    }

    #[test]
    fn events_serialize_with_a_tag() {
        let at = Utc::now();
        let event = DomainEvent::ErrorOccurred {
            context: "model call".into(),
            error_message: "timeout".into(),
            timestamp: at,
        };
        assert_eq!(event.timestamp(), at);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "error_occurred");
        assert_eq!(json["error_message"], "timeout");
    }
}
