//! Outbound ports the engine publishes through

use serde_json::Value;

/// Fire-and-forget topic publisher (broadcasts, lifecycle events).
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Value);
}
