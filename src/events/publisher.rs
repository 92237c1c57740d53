//! # Event Publisher
//!
//! Fire-and-forget broadcast of task lifecycle events to any number of subscribers.
//!
//! ```rust
//! use analysis_core::events::EventPublisher;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let publisher = EventPublisher::new(16);
//! let mut events = publisher.subscribe();
//!
//! publisher.publish("analysis.task_progress", "t1", &json!({"progress": 40})).unwrap();
//! let event = events.recv().await.unwrap();
//! assert_eq!(event.task_id, "t1");
//! # });
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Broadcast publisher for task lifecycle notifications
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone, Serialize)]
pub struct PublishedEvent {
    pub name: String,
    pub task_id: String,
    pub context: Value,
    pub published_at: DateTime<Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(
        &self,
        event_name: impl Into<String>,
        task_id: impl Into<String>,
        context: &impl Serialize,
    ) -> Result<(), PublishError> {
        let event = PublishedEvent {
            name: event_name.into(),
            task_id: task_id.into(),
            context: serde_json::to_value(context)?,
            published_at: Utc::now(),
        };

        // SendError only means nobody is listening right now
        let _ = self.sender.send(event);
        Ok(())
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Error types for event publishing
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000) // Default capacity of 1000 events
    }
}
