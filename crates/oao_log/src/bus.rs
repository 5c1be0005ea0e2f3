//! Broadcast event bus.
//!
//! Every append is published here; external consumers (the HTTP/WebSocket
//! facade, dashboards) subscribe either to the whole stream or to one
//! execution. Delivery is best-effort: a slow subscriber loses old events
//! rather than blocking the log.

use crate::event::Event;
use oao_core::ExecutionId;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

/// Cloneable handle to the broadcast channel
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus with the default buffer capacity
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with a custom buffer capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    ///
    /// A bus with no subscribers drops the event silently.
    pub fn publish(&self, event: &Event) {
        let _ = self.sender.send(event.clone());
    }

    /// Subscribe to every event on the bus
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Subscribe to a single execution's events
    #[must_use]
    pub fn subscribe_execution(&self, execution_id: ExecutionId) -> ExecutionEvents {
        ExecutionEvents {
            execution_id,
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscription filtered to one execution
pub struct ExecutionEvents {
    execution_id: ExecutionId,
    receiver: broadcast::Receiver<Event>,
}

impl ExecutionEvents {
    /// Receive the next event for the subscribed execution.
    ///
    /// Returns `None` once the bus is closed. Events dropped due to
    /// subscriber lag are skipped.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.execution_id == self.execution_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        execution_id = %self.execution_id,
                        skipped,
                        "event subscriber lagged"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventDraft, EventPayload};
    use crate::store::{EventLog, MemoryEventLog};
    use oao_core::Digest;
    use serde_json::json;

    fn started_draft() -> EventDraft {
        EventDraft::new(EventPayload::ExecutionStarted {
            task: json!("t"),
            execution_hash: Digest::empty(),
            agent_name: "a".to_string(),
        })
    }

    #[tokio::test]
    async fn test_log_publishes_to_bus() {
        let bus = EventBus::new();
        let mut all = bus.subscribe();
        let log = MemoryEventLog::new().with_bus(bus);
        let id = ExecutionId::new();

        log.append(id, started_draft()).unwrap();

        let received = all.recv().await.unwrap();
        assert_eq!(received.execution_id, id);
        assert_eq!(received.sequence, 0);
    }

    #[tokio::test]
    async fn test_execution_filter() {
        let bus = EventBus::new();
        let watched = ExecutionId::new();
        let other = ExecutionId::new();
        let mut subscription = bus.subscribe_execution(watched);
        let log = MemoryEventLog::new().with_bus(bus);

        log.append(other, started_draft()).unwrap();
        log.append(watched, started_draft()).unwrap();

        let received = subscription.recv().await.unwrap();
        assert_eq!(received.execution_id, watched);
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        let log = MemoryEventLog::new().with_bus(bus);
        log.append(ExecutionId::new(), started_draft()).unwrap();
    }
}
