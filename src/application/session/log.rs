//! Session log
//!
//! Append-only audit streams, one per charger identity (plus the station
//! aggregate) and one per transaction. Every entry is also emitted as a
//! `tracing` event so process logs carry the same information.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::domain::ChargerIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    /// Station → central system
    Inbound,
    /// Central system → station
    Outbound,
    /// Produced by the engine itself (timers, lifecycle)
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryKind {
    Call,
    CallResult,
    CallError,
    Timeout,
    Info,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Call => "Call",
            Self::CallResult => "CallResult",
            Self::CallError => "CallError",
            Self::Timeout => "Timeout",
            Self::Info => "Info",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    /// Process-wide append order
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub identity: ChargerIdentity,
    pub direction: Direction,
    pub kind: EntryKind,
    pub message_id: Option<String>,
    pub action: Option<String>,
    pub detail: Value,
    /// Message id of the call that caused this entry (trigger follow-ups)
    pub caused_by: Option<String>,
    pub transaction_id: Option<i32>,
}

impl LogEntry {
    pub fn new(identity: ChargerIdentity, direction: Direction, kind: EntryKind) -> Self {
        Self {
            seq: 0,
            at: Utc::now(),
            identity,
            direction,
            kind,
            message_id: None,
            action: None,
            detail: Value::Null,
            caused_by: None,
            transaction_id: None,
        }
    }

    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }

    pub fn caused_by(mut self, message_id: Option<String>) -> Self {
        self.caused_by = message_id;
        self
    }

    pub fn transaction(mut self, transaction_id: Option<i32>) -> Self {
        self.transaction_id = transaction_id;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamKey {
    /// Keyed by `ChargerIdentity::key()`
    Charger(String),
    Transaction(i32),
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Charger(key) => write!(f, "charger/{}", key),
            Self::Transaction(id) => write!(f, "transaction/{}", id),
        }
    }
}

#[derive(Debug, Default)]
struct Stream {
    entries: VecDeque<LogEntry>,
    closed: bool,
}

pub struct SessionLog {
    streams: DashMap<StreamKey, Stream>,
    max_entries: usize,
    seq: AtomicU64,
}

impl SessionLog {
    pub fn new(max_entries_per_stream: usize) -> Self {
        Self {
            streams: DashMap::new(),
            max_entries: max_entries_per_stream.max(1),
            seq: AtomicU64::new(1),
        }
    }

    /// Open (or reopen) a stream. History from earlier sessions is kept.
    pub fn open(&self, key: StreamKey) {
        self.streams.entry(key).or_default().closed = false;
    }

    pub fn close(&self, key: &StreamKey) {
        if let Some(mut stream) = self.streams.get_mut(key) {
            stream.closed = true;
            debug!(stream = %key, "Session log stream closed");
        }
    }

    pub fn is_open(&self, key: &StreamKey) -> bool {
        self.streams.get(key).is_some_and(|s| !s.closed)
    }

    /// Append one entry. It lands in the identity's stream, the station
    /// aggregate stream (for connector identities) and the transaction
    /// stream when tagged with one. Closed streams take no new connection
    /// traffic. Internal entries (timeouts, reconciliation) still reach the
    /// charger streams, which are created if the identity was never seen.
    pub fn append(&self, mut entry: LogEntry) -> u64 {
        entry.seq = self.seq.fetch_add(1, Ordering::Relaxed);

        info!(
            target: "session_log",
            charge_point_id = %entry.identity,
            direction = ?entry.direction,
            kind = %entry.kind,
            message_id = entry.message_id.as_deref().unwrap_or(""),
            action = entry.action.as_deref().unwrap_or(""),
            caused_by = entry.caused_by.as_deref().unwrap_or(""),
            detail = %entry.detail,
            "session event"
        );

        let mut targets = vec![StreamKey::Charger(entry.identity.key())];
        if !entry.identity.is_aggregate() {
            targets.push(StreamKey::Charger(entry.identity.to_aggregate().key()));
        }
        if let Some(tx) = entry.transaction_id {
            targets.push(StreamKey::Transaction(tx));
        }

        let internal = entry.direction == Direction::Internal;
        for key in targets {
            let target = match key {
                StreamKey::Charger(_) if internal => Some(self.streams.entry(key).or_default()),
                _ => self.streams.get_mut(&key).filter(|s| !s.closed),
            };
            if let Some(mut stream) = target {
                if stream.entries.len() >= self.max_entries {
                    stream.entries.pop_front();
                }
                stream.entries.push_back(entry.clone());
            }
        }
        entry.seq
    }

    pub fn snapshot(&self, key: &StreamKey) -> Option<Vec<LogEntry>> {
        self.streams
            .get(key)
            .map(|s| s.entries.iter().cloned().collect())
    }

    pub fn for_identity(&self, identity: &ChargerIdentity) -> Vec<LogEntry> {
        self.snapshot(&StreamKey::Charger(identity.key()))
            .unwrap_or_default()
    }

    pub fn for_transaction(&self, transaction_id: i32) -> Vec<LogEntry> {
        self.snapshot(&StreamKey::Transaction(transaction_id))
            .unwrap_or_default()
    }
}

impl Default for SessionLog {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn connector() -> ChargerIdentity {
        ChargerIdentity::new("CP1", 1)
    }

    #[test]
    fn entries_fan_out_to_aggregate_and_transaction() {
        let log = SessionLog::default();
        log.open(StreamKey::Charger("CP1".into()));
        log.open(StreamKey::Charger("CP1#1".into()));
        log.open(StreamKey::Transaction(7));

        log.append(
            LogEntry::new(connector(), Direction::Inbound, EntryKind::Call)
                .message_id("m1")
                .action("MeterValues")
                .transaction(Some(7)),
        );

        assert_eq!(log.for_identity(&connector()).len(), 1);
        assert_eq!(log.for_identity(&ChargerIdentity::aggregate("CP1")).len(), 1);
        assert_eq!(log.for_transaction(7).len(), 1);
    }

    #[test]
    fn closed_stream_keeps_history_but_takes_no_appends() {
        let log = SessionLog::default();
        let key = StreamKey::Charger("CP1#1".into());
        log.open(key.clone());
        log.append(LogEntry::new(connector(), Direction::Inbound, EntryKind::Call));
        log.close(&key);
        log.append(LogEntry::new(connector(), Direction::Outbound, EntryKind::Call));

        assert!(!log.is_open(&key));
        assert_eq!(log.for_identity(&connector()).len(), 1);

        log.open(key.clone());
        log.append(
            LogEntry::new(connector(), Direction::Internal, EntryKind::Info).detail(json!("back")),
        );
        assert_eq!(log.for_identity(&connector()).len(), 2);
    }

    #[test]
    fn internal_entries_reach_closed_and_unseen_charger_streams() {
        let log = SessionLog::default();
        let key = StreamKey::Charger("CP1#1".into());
        log.open(key.clone());
        log.open(StreamKey::Transaction(3));
        log.close(&key);
        log.close(&StreamKey::Transaction(3));

        log.append(
            LogEntry::new(connector(), Direction::Internal, EntryKind::Timeout)
                .message_id("c1")
                .transaction(Some(3)),
        );
        assert_eq!(log.for_identity(&connector()).len(), 1);
        assert_eq!(log.for_identity(&ChargerIdentity::aggregate("CP1")).len(), 1);
        assert!(log.for_transaction(3).is_empty());
        assert!(!log.is_open(&key));

        let unseen = ChargerIdentity::aggregate("CP9");
        log.append(LogEntry::new(unseen.clone(), Direction::Internal, EntryKind::Timeout));
        assert_eq!(log.for_identity(&unseen).len(), 1);
    }

    #[test]
    fn stream_is_bounded() {
        let log = SessionLog::new(3);
        let identity = ChargerIdentity::aggregate("CP1");
        log.open(StreamKey::Charger(identity.key()));
        for i in 0..5 {
            log.append(
                LogEntry::new(identity.clone(), Direction::Inbound, EntryKind::Call)
                    .message_id(format!("m{i}")),
            );
        }
        let entries = log.for_identity(&identity);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message_id.as_deref(), Some("m2"));
        assert!(entries.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[test]
    fn unopened_stream_is_empty() {
        let log = SessionLog::default();
        log.append(LogEntry::new(connector(), Direction::Inbound, EntryKind::Call));
        assert!(log.for_identity(&connector()).is_empty());
        assert!(log.snapshot(&StreamKey::Transaction(1)).is_none());
    }
}
