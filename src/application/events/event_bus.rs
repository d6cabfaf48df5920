//! Event bus: topic-addressed broadcast to in-process subscribers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::domain::Publisher;

const DEFAULT_CAPACITY: usize = 1024;

/// One published event
#[derive(Debug, Clone, Serialize)]
pub struct EventMessage {
    pub topic: String,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
}

/// Topic builders, so publishers and subscribers agree on names.
pub mod topics {
    use crate::domain::{ChargerIdentity, PendingCallStatus};

    pub fn charger_connected(identity: &ChargerIdentity) -> String {
        format!("charger/{}/connected", identity.key())
    }

    pub fn charger_disconnected(identity: &ChargerIdentity) -> String {
        format!("charger/{}/disconnected", identity.key())
    }

    pub fn charger_status(identity: &ChargerIdentity) -> String {
        format!("charger/{}/status", identity.key())
    }

    pub fn transaction_started(id: i32) -> String {
        format!("transaction/{}/started", id)
    }

    pub fn transaction_consumption(id: i32) -> String {
        format!("transaction/{}/consumption", id)
    }

    pub fn transaction_stopped(id: i32) -> String {
        format!("transaction/{}/stopped", id)
    }

    pub fn pending_call(message_id: &str, status: PendingCallStatus) -> String {
        format!("pending_call/{}/{}", message_id, status)
    }
}

/// Event bus for broadcasting events to all subscribers
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventMessage>,
    subscriber_count: Arc<AtomicUsize>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            subscriber_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn subscribe(&self) -> EventSubscriber {
        let receiver = self.sender.subscribe();
        let count = self.subscriber_count.fetch_add(1, Ordering::SeqCst) + 1;
        info!(total = count, "New event subscriber");

        EventSubscriber {
            receiver,
            subscriber_count: self.subscriber_count.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::SeqCst)
    }
}

impl Publisher for EventBus {
    fn publish(&self, topic: &str, payload: Value) {
        let message = EventMessage {
            topic: topic.to_string(),
            payload,
            published_at: Utc::now(),
        };

        match self.sender.send(message) {
            Ok(count) => debug!(topic, subscribers = count, "Event published"),
            Err(_) => debug!(topic, "Event published (no subscribers)"),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event subscriber that receives events from the bus
pub struct EventSubscriber {
    receiver: broadcast::Receiver<EventMessage>,
    subscriber_count: Arc<AtomicUsize>,
}

impl EventSubscriber {
    pub async fn recv(&mut self) -> Option<EventMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(missed = count, "Subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive, `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<EventMessage> {
        loop {
            match self.receiver.try_recv() {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(missed = count, "Subscriber lagged");
                    continue;
                }
                Err(_) => return None,
            }
        }
    }
}

impl Drop for EventSubscriber {
    fn drop(&mut self) {
        let prev = self.subscriber_count.fetch_sub(1, Ordering::SeqCst);
        debug!(remaining = prev.saturating_sub(1), "Event subscriber dropped");
    }
}

/// Shared event bus type
pub type SharedEventBus = Arc<EventBus>;

pub fn create_event_bus() -> SharedEventBus {
    Arc::new(EventBus::new())
}
