//! Central system facade
//!
//! Wires the session store, session log, pending-call registry and the
//! charging services together, and exposes the operations the control layer
//! calls: submit a pending call, read its result, read charger status and
//! read the session log.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::info;

use super::charging::{ConsumptionBroadcaster, StatusService, TransactionPolicy, TransactionService};
use super::commands::{
    CommandError, CommandTimeouts, OutboundAction, PendingCallRegistry, RecoveryReport,
    SharedPendingCallRegistry, TriggerFollowUps,
};
use super::events::{topics, EventBus, SharedEventBus};
use super::session::{
    LogEntry, SessionInfo, SessionLog, SessionRegistry, SharedSessionRegistry, StreamKey,
};
use crate::domain::{
    AccountService, ChargerIdentity, ChargerStatus, DomainResult, PendingCall, Publisher,
    RepositoryProvider,
};

/// Engine tunables, usually derived from `AppConfig`.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_connections_per_ip: usize,
    /// Seconds, returned in BootNotification
    pub heartbeat_interval: u32,
    pub command_timeouts: CommandTimeouts,
    pub follow_up_ttl: Duration,
    pub broadcast_interval: Duration,
    pub transaction_policy: TransactionPolicy,
    pub log_max_entries: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_connections_per_ip: 2,
            heartbeat_interval: 300,
            command_timeouts: CommandTimeouts::default(),
            follow_up_ttl: Duration::from_secs(60),
            broadcast_interval: Duration::from_secs(60),
            transaction_policy: TransactionPolicy::default(),
            log_max_entries: 1000,
        }
    }
}

pub struct CentralSystem {
    pub sessions: SharedSessionRegistry,
    pub log: Arc<SessionLog>,
    pub pending_calls: SharedPendingCallRegistry,
    pub statuses: Arc<StatusService>,
    pub transactions: Arc<TransactionService>,
    pub follow_ups: Arc<TriggerFollowUps>,
    pub events: SharedEventBus,
    pub heartbeat_interval: u32,
}

pub type SharedCentralSystem = Arc<CentralSystem>;

impl CentralSystem {
    /// Build every component. Must run inside a tokio runtime (the pending
    /// call mirror spawns its writer task).
    pub fn new(
        settings: EngineSettings,
        repositories: &dyn RepositoryProvider,
        accounts: Arc<dyn AccountService>,
    ) -> SharedCentralSystem {
        let events: SharedEventBus = Arc::new(EventBus::new());
        let publisher: Arc<dyn Publisher> = events.clone();
        let sessions = SessionRegistry::shared(settings.max_connections_per_ip);
        let log = Arc::new(SessionLog::new(settings.log_max_entries));
        let follow_ups = Arc::new(TriggerFollowUps::new(settings.follow_up_ttl));

        let pending_calls = Arc::new(PendingCallRegistry::new(
            sessions.clone(),
            log.clone(),
            publisher.clone(),
            repositories.pending_calls(),
            follow_ups.clone(),
            settings.command_timeouts,
        ));

        let statuses = Arc::new(StatusService::new(
            repositories.charger_statuses(),
            publisher.clone(),
        ));

        let broadcaster = Arc::new(ConsumptionBroadcaster::new(
            settings.broadcast_interval,
            repositories.transactions(),
            repositories.meter_values(),
            publisher.clone(),
        ));
        let transactions = Arc::new(TransactionService::new(
            repositories.transactions(),
            repositories.meter_values(),
            accounts,
            publisher,
            log.clone(),
            broadcaster,
            settings.transaction_policy,
        ));

        Arc::new(Self {
            sessions,
            log,
            pending_calls,
            statuses,
            transactions,
            follow_ups,
            events,
            heartbeat_interval: settings.heartbeat_interval,
        })
    }

    /// Send a CSMS-initiated call. Returns its message id.
    pub fn submit_pending_call(
        &self,
        identity: &ChargerIdentity,
        action: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<String, CommandError> {
        let action: OutboundAction = action
            .parse()
            .map_err(|_| CommandError::UnsupportedAction(action.to_string()))?;
        self.pending_calls
            .submit(identity, action.as_str(), payload, timeout)
    }

    pub async fn get_pending_call_result(&self, message_id: &str) -> DomainResult<Option<PendingCall>> {
        self.pending_calls.get(message_id).await
    }

    pub async fn get_charger_status(
        &self,
        identity: &ChargerIdentity,
    ) -> DomainResult<Option<ChargerStatus>> {
        self.statuses.get(identity).await
    }

    pub fn get_session_log(&self, identity: &ChargerIdentity) -> Vec<LogEntry> {
        self.log.for_identity(identity)
    }

    /// A session passed the handshake: open its log streams and announce it.
    pub fn on_connected(&self, session: &SessionInfo) {
        let identity = &session.identity;
        self.log.open(StreamKey::Charger(identity.key()));
        if !identity.is_aggregate() {
            self.log.open(StreamKey::Charger(identity.to_aggregate().key()));
        }
        self.events.publish(
            &topics::charger_connected(identity),
            json!({
                "connectionId": session.connection_id,
                "sourceIp": session.source_ip.to_string(),
                "subprotocol": session.subprotocol,
                "connectedAt": session.connected_at,
            }),
        );
    }

    /// The connection task ended. Does nothing when the session was already
    /// replaced by a newer connection for the same identity. Pending calls
    /// keep running on their own timers.
    pub fn on_disconnected(&self, session: &SessionInfo) -> bool {
        let identity = &session.identity;
        if !self.sessions.unregister(identity, session.connection_id) {
            return false;
        }

        self.log.close(&StreamKey::Charger(identity.key()));
        let station_online = self
            .sessions
            .connected()
            .iter()
            .any(|other| other.serial_number == identity.serial_number);
        if !identity.is_aggregate() && !station_online {
            self.log.close(&StreamKey::Charger(identity.to_aggregate().key()));
        }

        let cancelled = self.transactions.cancel_broadcasts_for(identity);
        self.events.publish(
            &topics::charger_disconnected(identity),
            json!({ "connectionId": session.connection_id, "broadcastsCancelled": cancelled }),
        );
        true
    }

    /// Restart reconciliation of the pending-call mirror.
    pub async fn recover(&self) -> DomainResult<RecoveryReport> {
        self.pending_calls.recover().await
    }

    /// Periodic housekeeping: drop old terminal calls and expired trigger
    /// markers.
    pub fn sweep(&self, retention: Duration) {
        let pruned = self.pending_calls.prune_terminal(retention);
        self.follow_ups.purge_expired();
        metrics::gauge!("ocpp_pending_calls_in_flight").set(self.pending_calls.pending_count() as f64);
        if pruned > 0 {
            info!(pruned, "Pruned terminal pending calls");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::session::{EntryKind, StreamKey};
    use crate::domain::PendingCallStatus;
    use crate::infrastructure::storage::{InMemoryAccountService, InMemoryRepositoryProvider};
    use serde_json::json;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::sync::mpsc;

    fn system() -> SharedCentralSystem {
        CentralSystem::new(
            EngineSettings::default(),
            &InMemoryRepositoryProvider::new(),
            Arc::new(InMemoryAccountService::default()),
        )
    }

    #[tokio::test]
    async fn unknown_outbound_action_is_refused() {
        let system = system();
        let err = system
            .submit_pending_call(&ChargerIdentity::aggregate("CP1"), "Explode", json!({}), None)
            .unwrap_err();
        assert_eq!(err, CommandError::UnsupportedAction("Explode".into()));
    }

    #[tokio::test]
    async fn submitted_call_is_readable() {
        let system = system();
        let cp = ChargerIdentity::aggregate("CP1");
        let (tx, mut rx) = mpsc::unbounded_channel();
        system
            .sessions
            .register(cp.clone(), IpAddr::V4(Ipv4Addr::LOCALHOST), tx, None)
            .unwrap();

        let id = system
            .submit_pending_call(&cp, "ClearCache", json!({}), None)
            .unwrap();
        assert!(rx.try_recv().unwrap().contains(&id));

        let call = system.get_pending_call_result(&id).await.unwrap().unwrap();
        assert_eq!(call.status, PendingCallStatus::Pending);
        assert_eq!(call.action, "ClearCache");
    }

    #[tokio::test]
    async fn disconnect_closes_streams_of_current_session_only() {
        let system = system();
        let cp = ChargerIdentity::new("CP1", 1);
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);

        let (old_tx, _old_rx) = mpsc::unbounded_channel();
        let old = system.sessions.register(cp.clone(), ip, old_tx, None).unwrap();
        system.on_connected(&old);
        let (new_tx, _new_rx) = mpsc::unbounded_channel();
        let new = system.sessions.register(cp.clone(), ip, new_tx, None).unwrap();
        system.on_connected(&new);

        // The replaced connection ending must not tear down the live one
        assert!(!system.on_disconnected(&old));
        assert!(system.log.is_open(&StreamKey::Charger(cp.key())));

        assert!(system.on_disconnected(&new));
        assert!(!system.log.is_open(&StreamKey::Charger(cp.key())));
        assert!(!system.log.is_open(&StreamKey::Charger("CP1".into())));
        assert!(!system.sessions.is_connected(&cp));
    }

    #[tokio::test(start_paused = true)]
    async fn call_timing_out_after_disconnect_is_still_logged() {
        let system = system();
        let cp = ChargerIdentity::aggregate("CP1");
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = system
            .sessions
            .register(cp.clone(), IpAddr::V4(Ipv4Addr::LOCALHOST), tx, None)
            .unwrap();
        system.on_connected(&session);

        let id = system
            .submit_pending_call(&cp, "GetConfiguration", json!({}), None)
            .unwrap();
        assert!(system.on_disconnected(&session));

        tokio::time::sleep(Duration::from_secs(6)).await;

        let call = system.get_pending_call_result(&id).await.unwrap().unwrap();
        assert_eq!(call.status, PendingCallStatus::TimedOut);
        let timeouts: Vec<_> = system
            .get_session_log(&cp)
            .into_iter()
            .filter(|e| e.kind == EntryKind::Timeout)
            .collect();
        assert_eq!(timeouts.len(), 1);
        assert_eq!(timeouts[0].message_id.as_deref(), Some(id.as_str()));
    }
}
