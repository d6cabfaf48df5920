//! Live connection handle

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::domain::ChargerIdentity;

/// An active WebSocket connection as seen by the rest of the engine.
///
/// The connection task owns the socket; this is only the lookup relation
/// plus the outbox sender that feeds the task's writer half.
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique per accepted socket, never reused within a process
    pub connection_id: u64,
    pub identity: ChargerIdentity,
    pub sender: mpsc::UnboundedSender<String>,
    pub source_ip: IpAddr,
    pub subprotocol: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Session snapshot without the outbox sender.
///
/// Handed to the connection task so the registry stays the only holder of
/// the sender; dropping the registry entry then closes the connection.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub connection_id: u64,
    pub identity: ChargerIdentity,
    pub source_ip: IpAddr,
    pub subprotocol: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(
        connection_id: u64,
        identity: ChargerIdentity,
        sender: mpsc::UnboundedSender<String>,
        source_ip: IpAddr,
        subprotocol: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            connection_id,
            identity,
            sender,
            source_ip,
            subprotocol,
            connected_at: now,
            last_activity: now,
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            connection_id: self.connection_id,
            identity: self.identity.clone(),
            source_ip: self.source_ip,
            subprotocol: self.subprotocol.clone(),
            connected_at: self.connected_at,
            last_activity: self.last_activity,
        }
    }

    /// Queue a frame on the connection's outbox
    pub fn send(&self, message: String) -> Result<(), String> {
        self.sender
            .send(message)
            .map_err(|e| format!("Failed to send message: {}", e))
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn is_stale(&self, timeout_seconds: i64) -> bool {
        Utc::now()
            .signed_duration_since(self.last_activity)
            .num_seconds()
            > timeout_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn make_session() -> (Session, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(
            1,
            ChargerIdentity::aggregate("CP001"),
            tx,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            Some("ocpp1.6".into()),
        );
        (session, rx)
    }

    #[test]
    fn send_delivers_message() {
        let (session, mut rx) = make_session();
        session.send("hello".into()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "hello");
    }

    #[test]
    fn send_to_closed_channel_returns_error() {
        let (session, rx) = make_session();
        drop(rx);
        assert!(session.send("msg".into()).is_err());
    }

    #[test]
    fn stale_after_inactivity() {
        let (mut session, _rx) = make_session();
        session.last_activity = Utc::now() - chrono::Duration::seconds(10);
        assert!(session.is_stale(5));
        session.touch();
        assert!(!session.is_stale(5));
    }
}
