//! Event bus for engine notifications
//!
//! Tokio broadcast channel. Publishing never blocks and never fails when
//! nobody is listening; slow subscribers lag and lose the oldest events.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::EngineEvent;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Broadcast bus for engine events
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: EngineEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "Event published"),
            Err(_) => debug!(event_type, "Event published (no receivers)"),
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver that only yields events for one work item
pub struct WorkItemReceiver {
    receiver: broadcast::Receiver<EngineEvent>,
    work_item_id: String,
}

impl WorkItemReceiver {
    pub fn new(receiver: broadcast::Receiver<EngineEvent>, work_item_id: &str) -> Self {
        Self {
            receiver,
            work_item_id: work_item_id.to_string(),
        }
    }

    /// Receive the next event for the watched work item
    pub async fn recv(&mut self) -> Result<EngineEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if event.work_item_id() == Some(self.work_item_id.as_str()) {
                return Ok(event);
            }
        }
    }
}
