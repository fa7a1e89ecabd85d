//! Runtime event stream.
//!
//! The runtime publishes an event whenever an actor changes state or a
//! delivery goes wrong. Tests and hosts subscribe to react to those without
//! scraping logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All runtime events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RuntimeEvent {
    /// An actor finished `init` and is accepting traffic
    ActorStarted {
        name: String,
        capability: String,
        timestamp: DateTime<Utc>,
    },

    /// An actor's worker was joined and its teardown ran
    ActorStopped {
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// A destination could not be reached; siblings were still served
    DeliveryFailed {
        sender: String,
        destination: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A receive handler returned an error or panicked
    HandlerFailed {
        actor: String,
        message_uuid: String,
        kind: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A filter dropped a message
    MessageDropped {
        filter: String,
        message_uuid: String,
        timestamp: DateTime<Utc>,
    },

    /// A permission guard refused a message
    PermissionDenied {
        actor: String,
        resource: String,
        identity: String,
        permission: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based bus for runtime events.
pub struct EventBus {
    sender: broadcast::Sender<Arc<RuntimeEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: RuntimeEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RuntimeEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
