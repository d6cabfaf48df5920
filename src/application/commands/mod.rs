//! Pending-call registry: central system → station calls
//!
//! ## Flow
//!
//! ```text
//! submit ──► memory map + mirror upsert + timer ──► Call frame on the session outbox
//!                                                         │
//! Dispatcher ◄── CallResult / CallError ◄──────────────────┘
//!     │
//!     └─► resolve / reject ──► conditional mirror write ──► terminal status,
//!                                                          timer aborted, waiters woken
//!
//! timer fires ──► on_timeout ──► conditional mirror write ──► TimedOut
//! ```
//!
//! The first terminal write wins across every process sharing the mirror:
//! a transition only lands if the stored record is still Pending, and a
//! loser adopts the stored record instead. Memory is the fast path; the
//! mirror answers for calls this process does not hold (other processes,
//! or records from before a restart).

pub mod actions;
pub mod follow_ups;
pub mod mirror;
pub mod v16;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use super::events::topics;
use super::session::{Direction, EntryKind, LogEntry, SessionLog, SharedSessionRegistry};
use crate::domain::{ChargerIdentity, PendingCall, PendingCallStatus, PendingCallStore, Publisher};
use crate::shared::errors::DomainResult;
use crate::shared::ocpp_frame::OcppFrame;

pub use actions::{CommandTimeouts, OutboundAction};
pub use follow_ups::TriggerFollowUps;
pub use mirror::{MirrorWriter, Settled};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("Charger not connected: {0}")]
    NotConnected(String),
    #[error("Failed to send: {0}")]
    SendFailed(String),
    #[error("Response timeout")]
    Timeout,
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("CallError {code}: {description}")]
    CallError { code: String, description: String },
    #[error("Unknown pending call: {0}")]
    UnknownCall(String),
    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),
}

/// Outcome of applying a reply or timeout to a pending call.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// This write moved the call to its terminal state
    Applied(PendingCall),
    /// The call was already terminal; nothing changed
    AlreadyTerminal(PendingCall),
    /// No such call in memory or in the mirror
    Unknown,
}

struct Tracked {
    call: PendingCall,
    timer: Option<AbortHandle>,
    notify: watch::Sender<PendingCallStatus>,
    finished_at: Option<Instant>,
}

/// Restart reconciliation summary
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub timed_out: usize,
    pub rearmed: usize,
}

pub struct PendingCallRegistry {
    sessions: SharedSessionRegistry,
    log: Arc<SessionLog>,
    publisher: Arc<dyn Publisher>,
    store: Arc<dyn PendingCallStore>,
    mirror: MirrorWriter,
    follow_ups: Arc<TriggerFollowUps>,
    timeouts: CommandTimeouts,
    calls: DashMap<String, Tracked>,
}

pub type SharedPendingCallRegistry = Arc<PendingCallRegistry>;

impl PendingCallRegistry {
    pub fn new(
        sessions: SharedSessionRegistry,
        log: Arc<SessionLog>,
        publisher: Arc<dyn Publisher>,
        store: Arc<dyn PendingCallStore>,
        follow_ups: Arc<TriggerFollowUps>,
        timeouts: CommandTimeouts,
    ) -> Self {
        let mirror = MirrorWriter::spawn(store.clone());
        Self {
            sessions,
            log,
            publisher,
            store,
            mirror,
            follow_ups,
            timeouts,
            calls: DashMap::new(),
        }
    }

    pub fn timeouts(&self) -> &CommandTimeouts {
        &self.timeouts
    }

    /// Send a call to `identity` and start tracking it.
    ///
    /// Fails with `NotConnected` without creating any record when the
    /// identity has no live session. `timeout` overrides the per-action
    /// default.
    pub fn submit(
        self: &Arc<Self>,
        identity: &ChargerIdentity,
        action: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<String, CommandError> {
        let session = self
            .sessions
            .lookup(identity)
            .ok_or_else(|| CommandError::NotConnected(identity.key()))?;

        let message_id = Uuid::new_v4().to_string();
        let timeout = timeout.unwrap_or_else(|| self.timeouts.for_action(action));
        let now = Utc::now();
        let timeout_at = now
            + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::days(365));

        let call = PendingCall::new(
            message_id.clone(),
            identity.clone(),
            action,
            payload.clone(),
            now,
            timeout_at,
        );
        let frame = OcppFrame::Call {
            unique_id: message_id.clone(),
            action: action.to_string(),
            payload: payload.clone(),
        }
        .serialize();

        self.track(call.clone());
        self.mirror.upsert(&call);
        self.arm_timer(&message_id, timeout);

        self.log.append(
            LogEntry::new(identity.clone(), Direction::Outbound, EntryKind::Call)
                .message_id(&message_id)
                .action(action)
                .detail(payload.clone()),
        );

        // Before sending: the triggered notification can race the reply
        if action == OutboundAction::TriggerMessage.as_str() {
            self.register_follow_up(identity, &payload, &message_id);
        }

        if let Err(e) = session.send(frame) {
            if let Some((_, tracked)) = self.calls.remove(&message_id) {
                if let Some(timer) = tracked.timer {
                    timer.abort();
                }
            }
            self.mirror.delete(&message_id);
            self.log.append(
                LogEntry::new(identity.clone(), Direction::Internal, EntryKind::Info)
                    .message_id(&message_id)
                    .action(action)
                    .detail(json!({ "undelivered": e })),
            );
            return Err(CommandError::NotConnected(identity.key()));
        }

        metrics::counter!("ocpp_pending_calls_submitted_total", "action" => action.to_string())
            .increment(1);
        info!(
            charge_point_id = %identity,
            action,
            message_id = message_id.as_str(),
            timeout_ms = timeout.as_millis() as u64,
            "Submitted pending call"
        );
        Ok(message_id)
    }

    /// Submit and wait for the terminal outcome.
    pub async fn call(
        self: &Arc<Self>,
        identity: &ChargerIdentity,
        action: &str,
        payload: Value,
    ) -> Result<Value, CommandError> {
        let message_id = self.submit(identity, action, payload, None)?;
        let call = self
            .wait(&message_id)
            .await
            .ok_or_else(|| CommandError::UnknownCall(message_id.clone()))?;

        match call.status {
            PendingCallStatus::Completed => Ok(call.result_payload.unwrap_or_else(|| json!({}))),
            PendingCallStatus::Failed => {
                let error = call.error_payload.unwrap_or_default();
                Err(CommandError::CallError {
                    code: error["code"].as_str().unwrap_or("GenericError").to_string(),
                    description: error["description"].as_str().unwrap_or("").to_string(),
                })
            }
            PendingCallStatus::TimedOut => Err(CommandError::Timeout),
            PendingCallStatus::Pending => Err(CommandError::UnknownCall(message_id)),
        }
    }

    /// Apply a CallResult.
    pub async fn resolve(&self, message_id: &str, payload: Value) -> DomainResult<Resolution> {
        self.finish(message_id, PendingCallStatus::Completed, Some(payload), None, true)
            .await
    }

    /// Apply a CallError.
    pub async fn reject(
        &self,
        message_id: &str,
        code: &str,
        description: &str,
        details: Value,
    ) -> DomainResult<Resolution> {
        let error = json!({
            "code": code,
            "description": description,
            "details": details,
        });
        self.finish(message_id, PendingCallStatus::Failed, None, Some(error), true)
            .await
    }

    /// Timer expiry. A no-op when the call already reached a terminal state,
    /// here or in another process sharing the mirror.
    pub async fn on_timeout(&self, message_id: &str) -> Resolution {
        let reason = Some(json!({ "reason": "NoReply" }));
        match self
            .finish(message_id, PendingCallStatus::TimedOut, None, reason, false)
            .await
        {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!(message_id, error = %e, "Failed to time out pending call");
                Resolution::Unknown
            }
        }
    }

    /// Current snapshot, from memory or the durable mirror. A call still
    /// Pending here but already terminal in the mirror is adopted.
    pub async fn get(&self, message_id: &str) -> DomainResult<Option<PendingCall>> {
        let local = self.calls.get(message_id).map(|t| t.call.clone());
        match local {
            Some(call) if call.is_terminal() => Ok(Some(call)),
            Some(call) => match self.store.get(message_id).await? {
                Some(stored) if stored.is_terminal() => {
                    self.adopt(stored.clone(), true);
                    Ok(Some(stored))
                }
                _ => Ok(Some(call)),
            },
            None => self.store.get(message_id).await,
        }
    }

    /// Wait until the call is terminal and return it.
    ///
    /// Bounded by the call's own timeout since its timer always fires.
    pub async fn wait(&self, message_id: &str) -> Option<PendingCall> {
        let receiver = self.calls.get(message_id).map(|t| t.notify.subscribe());
        if let Some(mut receiver) = receiver {
            let _ = receiver.wait_for(|status| status.is_terminal()).await;
        }
        match self.get(message_id).await {
            Ok(call) => call,
            Err(e) => {
                warn!(message_id, error = %e, "Failed to read pending call");
                None
            }
        }
    }

    /// Reconcile the durable mirror after a restart.
    ///
    /// Calls whose deadline passed while the process was down become
    /// TimedOut with reason `LostOnRestart`; the rest are re-armed for their
    /// remaining time.
    pub async fn recover(self: &Arc<Self>) -> DomainResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let now = Utc::now();

        for call in self.store.list_pending().await? {
            if self.calls.contains_key(&call.message_id) {
                continue;
            }
            if call.timeout_at <= now {
                let updated = self
                    .store
                    .finish_if_pending(
                        &call.message_id,
                        PendingCallStatus::TimedOut,
                        None,
                        Some(json!({ "reason": "LostOnRestart" })),
                        now,
                    )
                    .await?;
                if let Some(call) = updated {
                    warn!(
                        charge_point_id = %call.identity,
                        action = call.action.as_str(),
                        message_id = call.message_id.as_str(),
                        "Pending call lost on restart"
                    );
                    self.log.append(
                        LogEntry::new(call.identity.clone(), Direction::Internal, EntryKind::Timeout)
                            .message_id(call.message_id.clone())
                            .action(call.action.clone())
                            .detail(json!({ "reason": "LostOnRestart" })),
                    );
                    self.publish_status(&call);
                    report.timed_out += 1;
                }
            } else {
                let remaining = (call.timeout_at - now).to_std().unwrap_or_default();
                let message_id = call.message_id.clone();
                self.track(call);
                self.arm_timer(&message_id, remaining);
                report.rearmed += 1;
            }
        }

        info!(
            timed_out = report.timed_out,
            rearmed = report.rearmed,
            "Pending-call mirror reconciled"
        );
        Ok(report)
    }

    /// Forget terminal calls older than `retention`. They stay readable
    /// through the mirror. Returns how many were dropped.
    pub fn prune_terminal(&self, retention: Duration) -> usize {
        let before = self.calls.len();
        self.calls.retain(|_, tracked| match tracked.finished_at {
            Some(at) => at.elapsed() < retention,
            None => true,
        });
        before - self.calls.len()
    }

    /// Calls currently held in memory and still Pending.
    pub fn pending_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|t| !t.call.is_terminal())
            .count()
    }

    /// Wait for queued mirror writes to land.
    pub async fn flush_mirror(&self) {
        self.mirror.flush().await;
    }

    // ── internals ──────────────────────────────────────────

    fn track(&self, call: PendingCall) {
        let (notify, _) = watch::channel(call.status);
        self.calls.insert(
            call.message_id.clone(),
            Tracked {
                call,
                timer: None,
                notify,
                finished_at: None,
            },
        );
    }

    fn arm_timer(self: &Arc<Self>, message_id: &str, timeout: Duration) {
        let registry = Arc::clone(self);
        let id = message_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            registry.on_timeout(&id).await;
        })
        .abort_handle();

        match self.calls.get_mut(message_id) {
            Some(mut tracked) if !tracked.call.is_terminal() => tracked.timer = Some(handle),
            _ => handle.abort(),
        }
    }

    /// Install a terminal record decided by the mirror. Overwrites whatever
    /// memory holds so every process converges on the stored outcome.
    fn adopt(&self, call: PendingCall, abort_timer: bool) {
        let Some(mut tracked) = self.calls.get_mut(&call.message_id) else {
            return;
        };
        let status = call.status;
        tracked.call = call;
        tracked.finished_at.get_or_insert_with(Instant::now);
        if let Some(timer) = tracked.timer.take() {
            if abort_timer {
                timer.abort();
            }
        }
        let _ = tracked.notify.send(status);
    }

    /// `abort_timer` is false when called from the timer task itself.
    async fn finish(
        &self,
        message_id: &str,
        status: PendingCallStatus,
        result: Option<Value>,
        error: Option<Value>,
        abort_timer: bool,
    ) -> DomainResult<Resolution> {
        let candidate = match self.calls.get(message_id) {
            Some(tracked) if tracked.call.is_terminal() => {
                return Ok(Resolution::AlreadyTerminal(tracked.call.clone()));
            }
            Some(tracked) => {
                let mut call = tracked.call.clone();
                call.finish(status, result.clone(), error.clone(), Utc::now());
                Some(call)
            }
            None => None,
        };
        let Some(call) = candidate else {
            return self.finish_foreign(message_id, status, result, error).await;
        };

        let applied = match self.mirror.finish(&call).await {
            Ok(Settled::Won(stored)) => {
                self.adopt(stored.clone(), abort_timer);
                stored
            }
            Ok(Settled::Lost(stored)) => {
                info!(
                    charge_point_id = %stored.identity,
                    message_id,
                    status = %stored.status,
                    "Pending call already settled elsewhere"
                );
                self.adopt(stored.clone(), abort_timer);
                return Ok(Resolution::AlreadyTerminal(stored));
            }
            Err(e) => {
                warn!(message_id, error = %e, "Mirror unavailable, settling in memory only");
                let still_pending = self
                    .calls
                    .get(message_id)
                    .is_some_and(|t| !t.call.is_terminal());
                if !still_pending {
                    return Ok(self
                        .calls
                        .get(message_id)
                        .map(|t| Resolution::AlreadyTerminal(t.call.clone()))
                        .unwrap_or(Resolution::Unknown));
                }
                self.adopt(call.clone(), abort_timer);
                call
            }
        };

        if applied.status == PendingCallStatus::TimedOut {
            warn!(
                charge_point_id = %applied.identity,
                action = applied.action.as_str(),
                message_id,
                "Pending call timed out"
            );
            self.log.append(
                LogEntry::new(applied.identity.clone(), Direction::Internal, EntryKind::Timeout)
                    .message_id(message_id)
                    .action(applied.action.clone())
                    .detail(json!({ "timeout_at": applied.timeout_at })),
            );
        } else {
            info!(
                charge_point_id = %applied.identity,
                action = applied.action.as_str(),
                message_id,
                status = %applied.status,
                "Pending call resolved"
            );
        }
        self.publish_status(&applied);
        Ok(Resolution::Applied(applied))
    }

    /// A reply for a call this process does not hold: it may be Pending in
    /// the mirror for another process.
    async fn finish_foreign(
        &self,
        message_id: &str,
        status: PendingCallStatus,
        result: Option<Value>,
        error: Option<Value>,
    ) -> DomainResult<Resolution> {
        let updated = self
            .store
            .finish_if_pending(message_id, status, result, error, Utc::now())
            .await?;
        match updated {
            Some(call) => {
                info!(
                    charge_point_id = %call.identity,
                    message_id,
                    status = %status,
                    "Pending call resolved through mirror"
                );
                self.publish_status(&call);
                Ok(Resolution::Applied(call))
            }
            None => match self.store.get(message_id).await? {
                Some(call) => Ok(Resolution::AlreadyTerminal(call)),
                None => {
                    warn!(message_id, "Reply for unknown pending call ignored");
                    Ok(Resolution::Unknown)
                }
            },
        }
    }

    fn publish_status(&self, call: &PendingCall) {
        let counter = match call.status {
            PendingCallStatus::Completed => "ocpp_pending_calls_completed_total",
            PendingCallStatus::Failed => "ocpp_pending_calls_failed_total",
            PendingCallStatus::TimedOut => "ocpp_pending_calls_timed_out_total",
            PendingCallStatus::Pending => return,
        };
        metrics::counter!(counter, "action" => call.action.clone()).increment(1);

        self.publisher.publish(
            &topics::pending_call(&call.message_id, call.status),
            json!({
                "messageId": call.message_id,
                "charger": call.identity.key(),
                "action": call.action,
                "status": call.status.as_str(),
                "result": call.result_payload,
                "error": call.error_payload,
            }),
        );
    }

    fn register_follow_up(&self, identity: &ChargerIdentity, payload: &Value, message_id: &str) {
        let Some(target) = payload.get("requestedMessage").and_then(Value::as_str) else {
            return;
        };
        let connector_id = payload
            .get("connectorId")
            .and_then(Value::as_u64)
            .map(|c| c as u32);
        self.follow_ups
            .register(&identity.serial_number, target, connector_id, message_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::EventBus;
    use crate::application::session::{SessionRegistry, StreamKey};
    use crate::infrastructure::storage::memory::InMemoryPendingCallStore;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::sync::mpsc;

    const IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    struct Fixture {
        registry: SharedPendingCallRegistry,
        sessions: SharedSessionRegistry,
        log: Arc<SessionLog>,
        store: Arc<InMemoryPendingCallStore>,
    }

    fn fixture() -> Fixture {
        fixture_on(Arc::new(InMemoryPendingCallStore::new()))
    }

    /// A second process is a second registry over the same mirror.
    fn fixture_on(store: Arc<InMemoryPendingCallStore>) -> Fixture {
        let sessions = SessionRegistry::shared(10);
        let log = Arc::new(SessionLog::default());
        let registry = Arc::new(PendingCallRegistry::new(
            sessions.clone(),
            log.clone(),
            Arc::new(EventBus::new()),
            store.clone(),
            Arc::new(TriggerFollowUps::new(Duration::from_secs(60))),
            CommandTimeouts::default(),
        ));
        Fixture {
            registry,
            sessions,
            log,
            store,
        }
    }

    fn connect(f: &Fixture, identity: &ChargerIdentity) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        f.sessions.register(identity.clone(), IP, tx, None).unwrap();
        f.log.open(StreamKey::Charger(identity.key()));
        rx
    }

    #[tokio::test]
    async fn submit_sends_call_frame() {
        let f = fixture();
        let cp = ChargerIdentity::aggregate("CP1");
        let mut rx = connect(&f, &cp);

        let id = f
            .registry
            .submit(&cp, "Reset", json!({"type": "Soft"}), None)
            .unwrap();

        let frame = OcppFrame::parse(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(
            frame,
            OcppFrame::Call {
                unique_id: id.clone(),
                action: "Reset".into(),
                payload: json!({"type": "Soft"}),
            }
        );

        f.registry.flush_mirror().await;
        let mirrored = f.store.get(&id).await.unwrap().unwrap();
        assert_eq!(mirrored.status, PendingCallStatus::Pending);
    }

    #[tokio::test]
    async fn submit_to_disconnected_creates_nothing() {
        let f = fixture();
        let err = f
            .registry
            .submit(&ChargerIdentity::aggregate("ghost"), "GetConfiguration", json!({}), None)
            .unwrap_err();

        assert_eq!(err, CommandError::NotConnected("ghost".into()));
        assert_eq!(f.registry.pending_count(), 0);
        f.registry.flush_mirror().await;
        assert!(f.store.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn first_terminal_write_wins() {
        let f = fixture();
        let cp = ChargerIdentity::aggregate("CP1");
        let _rx = connect(&f, &cp);
        let id = f.registry.submit(&cp, "Reset", json!({}), None).unwrap();

        let first = f.registry.resolve(&id, json!({"status": "Accepted"})).await.unwrap();
        assert!(matches!(first, Resolution::Applied(_)));

        let second = f
            .registry
            .reject(&id, "InternalError", "late", json!({}))
            .await
            .unwrap();
        assert!(matches!(second, Resolution::AlreadyTerminal(_)));
        assert!(matches!(f.registry.on_timeout(&id).await, Resolution::AlreadyTerminal(_)));

        let call = f.registry.get(&id).await.unwrap().unwrap();
        assert_eq!(call.status, PendingCallStatus::Completed);
        assert_eq!(call.result_payload, Some(json!({"status": "Accepted"})));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_once_with_one_log_line() {
        let f = fixture();
        let cp = ChargerIdentity::aggregate("CP1");
        let _rx = connect(&f, &cp);
        let id = f
            .registry
            .submit(&cp, "GetConfiguration", json!({}), None)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(
            f.registry.get(&id).await.unwrap().unwrap().status,
            PendingCallStatus::Pending
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        let call = f.registry.get(&id).await.unwrap().unwrap();
        assert_eq!(call.status, PendingCallStatus::TimedOut);

        let late = f.registry.resolve(&id, json!({})).await.unwrap();
        assert!(matches!(late, Resolution::AlreadyTerminal(_)));

        let timeouts = f
            .log
            .for_identity(&cp)
            .into_iter()
            .filter(|e| e.kind == EntryKind::Timeout)
            .count();
        assert_eq!(timeouts, 1);
    }

    #[tokio::test]
    async fn call_returns_reply_payload() {
        let f = fixture();
        let cp = ChargerIdentity::aggregate("CP1");
        let mut rx = connect(&f, &cp);

        let registry = f.registry.clone();
        let station = tokio::spawn(async move {
            let frame = OcppFrame::parse(&rx.recv().await.unwrap()).unwrap();
            registry
                .resolve(frame.unique_id(), json!({"status": "Accepted"}))
                .await
                .unwrap();
        });

        let reply = f
            .registry
            .call(&cp, "ClearCache", json!({}))
            .await
            .unwrap();
        station.await.unwrap();
        assert_eq!(reply, json!({"status": "Accepted"}));
    }

    #[tokio::test]
    async fn reply_for_unknown_id_is_ignored() {
        let f = fixture();
        let resolution = f.registry.resolve("nope", json!({})).await.unwrap();
        assert_eq!(resolution, Resolution::Unknown);
    }

    #[tokio::test]
    async fn reply_for_call_held_by_another_process_is_applied_in_mirror() {
        let f = fixture();
        let now = Utc::now();
        let foreign = PendingCall::new(
            "foreign-1",
            ChargerIdentity::aggregate("CP9"),
            "Reset",
            json!({}),
            now,
            now + chrono::Duration::seconds(30),
        );
        f.store.upsert(&foreign).await.unwrap();

        let resolution = f
            .registry
            .resolve("foreign-1", json!({"status": "Rejected"}))
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::Applied(_)));

        let stored = f.store.get("foreign-1").await.unwrap().unwrap();
        assert_eq!(stored.status, PendingCallStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn recover_times_out_elapsed_and_rearms_live_calls() {
        let f = fixture();
        let now = Utc::now();
        let cp = ChargerIdentity::aggregate("CP1");

        let elapsed = PendingCall::new(
            "old",
            cp.clone(),
            "Reset",
            json!({}),
            now - chrono::Duration::seconds(60),
            now - chrono::Duration::seconds(30),
        );
        let live = PendingCall::new(
            "live",
            cp.clone(),
            "Reset",
            json!({}),
            now,
            now + chrono::Duration::seconds(10),
        );
        f.store.upsert(&elapsed).await.unwrap();
        f.store.upsert(&live).await.unwrap();

        let report = f.registry.recover().await.unwrap();
        assert_eq!(report, RecoveryReport { timed_out: 1, rearmed: 1 });

        let old = f.registry.get("old").await.unwrap().unwrap();
        assert_eq!(old.status, PendingCallStatus::TimedOut);
        assert_eq!(old.error_payload, Some(json!({"reason": "LostOnRestart"})));

        tokio::time::sleep(Duration::from_secs(11)).await;
        let live = f.registry.get("live").await.unwrap().unwrap();
        assert_eq!(live.status, PendingCallStatus::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn rearmed_timer_does_not_overwrite_reply_from_other_process() {
        let a = fixture();
        let b = fixture_on(a.store.clone());
        let cp = ChargerIdentity::aggregate("CP1");
        let _rx = connect(&a, &cp);

        let id = a
            .registry
            .submit(&cp, "Reset", json!({}), Some(Duration::from_secs(10)))
            .unwrap();
        a.registry.flush_mirror().await;
        assert_eq!(b.registry.recover().await.unwrap().rearmed, 1);

        let applied = a.registry.resolve(&id, json!({"status": "Accepted"})).await.unwrap();
        assert!(matches!(applied, Resolution::Applied(_)));

        tokio::time::sleep(Duration::from_secs(11)).await;

        let stored = a.store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, PendingCallStatus::Completed);
        let seen_by_b = b.registry.get(&id).await.unwrap().unwrap();
        assert_eq!(seen_by_b.status, PendingCallStatus::Completed);
        assert_eq!(seen_by_b.result_payload, Some(json!({"status": "Accepted"})));
        assert!(b
            .log
            .for_identity(&cp)
            .iter()
            .all(|e| e.kind != EntryKind::Timeout));
    }

    #[tokio::test]
    async fn reply_to_stale_holder_adopts_stored_outcome() {
        let a = fixture();
        let b = fixture_on(a.store.clone());
        let cp = ChargerIdentity::aggregate("CP1");
        let _rx = connect(&a, &cp);

        let id = a.registry.submit(&cp, "Reset", json!({}), None).unwrap();
        a.registry.flush_mirror().await;
        b.registry.recover().await.unwrap();

        a.registry
            .reject(&id, "InternalError", "boom", json!({}))
            .await
            .unwrap();
        let late = b.registry.resolve(&id, json!({"status": "Accepted"})).await.unwrap();
        assert!(matches!(late, Resolution::AlreadyTerminal(ref c) if c.status == PendingCallStatus::Failed));

        let waited = b.registry.wait(&id).await.unwrap();
        assert_eq!(waited.status, PendingCallStatus::Failed);
        assert_eq!(a.store.get(&id).await.unwrap().unwrap().status, PendingCallStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_on_restart_is_logged_without_open_stream() {
        let f = fixture();
        let now = Utc::now();
        let cp = ChargerIdentity::aggregate("CP7");
        let call = PendingCall::new(
            "gone",
            cp.clone(),
            "Reset",
            json!({}),
            now - chrono::Duration::seconds(60),
            now - chrono::Duration::seconds(30),
        );
        f.store.upsert(&call).await.unwrap();

        f.registry.recover().await.unwrap();

        let entries = f.log.for_identity(&cp);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::Timeout);
        assert_eq!(entries[0].detail, json!({"reason": "LostOnRestart"}));
    }

    #[tokio::test(start_paused = true)]
    async fn prune_drops_only_old_terminal_calls() {
        let f = fixture();
        let cp = ChargerIdentity::aggregate("CP1");
        let _rx = connect(&f, &cp);
        let done = f.registry.submit(&cp, "Reset", json!({}), None).unwrap();
        let open = f.registry.submit(&cp, "Reset", json!({}), None).unwrap();
        f.registry.resolve(&done, json!({})).await.unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(f.registry.prune_terminal(Duration::from_secs(10)), 1);
        assert_eq!(f.registry.pending_count(), 1);

        // Pruned calls remain readable through the mirror
        f.registry.flush_mirror().await;
        let call = f.registry.get(&done).await.unwrap().unwrap();
        assert_eq!(call.status, PendingCallStatus::Completed);
        assert!(f.registry.get(&open).await.unwrap().is_some());
    }
}
