//! TriggerMessage follow-ups
//!
//! A TriggerMessage asks the station to send a notification. The next
//! matching notification from that station is annotated with the trigger's
//! message id; unconsumed markers expire.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct FollowUp {
    trigger_message_id: String,
    connector_id: Option<u32>,
    requested_at: Instant,
}

pub struct TriggerFollowUps {
    /// (station serial, target action) → markers, oldest first
    markers: DashMap<(String, String), Vec<FollowUp>>,
    ttl: Duration,
}

impl TriggerFollowUps {
    pub fn new(ttl: Duration) -> Self {
        Self {
            markers: DashMap::new(),
            ttl,
        }
    }

    pub fn register(
        &self,
        serial_number: &str,
        target_action: &str,
        connector_id: Option<u32>,
        trigger_message_id: &str,
    ) {
        debug!(
            charge_point_id = serial_number,
            target_action,
            trigger_message_id,
            "Registered trigger follow-up"
        );
        self.markers
            .entry((serial_number.to_string(), target_action.to_string()))
            .or_default()
            .push(FollowUp {
                trigger_message_id: trigger_message_id.to_string(),
                connector_id,
                requested_at: Instant::now(),
            });
    }

    /// Take the oldest live marker matching an inbound notification.
    ///
    /// A marker without a connector matches any connector.
    pub fn consume(
        &self,
        serial_number: &str,
        action: &str,
        connector_id: Option<u32>,
    ) -> Option<String> {
        let key = (serial_number.to_string(), action.to_string());
        let mut entry = self.markers.get_mut(&key)?;
        let ttl = self.ttl;
        entry.retain(|m| m.requested_at.elapsed() < ttl);

        let position = entry.iter().position(|m| match (m.connector_id, connector_id) {
            (None, _) => true,
            (Some(wanted), Some(got)) => wanted == got,
            (Some(_), None) => false,
        });
        let consumed = position.map(|i| entry.remove(i).trigger_message_id);
        let now_empty = entry.is_empty();
        drop(entry);

        if now_empty {
            self.markers.remove_if(&key, |_, v| v.is_empty());
        }
        consumed
    }

    /// Drop every expired marker.
    pub fn purge_expired(&self) {
        let ttl = self.ttl;
        self.markers.retain(|_, markers| {
            markers.retain(|m| m.requested_at.elapsed() < ttl);
            !markers.is_empty()
        });
    }

    pub fn len(&self) -> usize {
        self.markers.iter().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn marker_is_consumed_once() {
        let follow_ups = TriggerFollowUps::new(Duration::from_secs(60));
        follow_ups.register("CP1", "StatusNotification", Some(1), "trig-1");

        assert_eq!(follow_ups.consume("CP1", "StatusNotification", Some(2)), None);
        assert_eq!(
            follow_ups.consume("CP1", "StatusNotification", Some(1)),
            Some("trig-1".into())
        );
        assert_eq!(follow_ups.consume("CP1", "StatusNotification", Some(1)), None);
        assert!(follow_ups.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn marker_expires() {
        let follow_ups = TriggerFollowUps::new(Duration::from_secs(60));
        follow_ups.register("CP1", "Heartbeat", None, "trig-1");
        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(follow_ups.consume("CP1", "Heartbeat", None), None);
        follow_ups.register("CP1", "Heartbeat", None, "trig-2");
        tokio::time::advance(Duration::from_secs(61)).await;
        follow_ups.purge_expired();
        assert!(follow_ups.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn marker_without_connector_matches_any() {
        let follow_ups = TriggerFollowUps::new(Duration::from_secs(60));
        follow_ups.register("CP1", "MeterValues", None, "trig-1");
        assert_eq!(
            follow_ups.consume("CP1", "MeterValues", Some(3)),
            Some("trig-1".into())
        );
    }
}
