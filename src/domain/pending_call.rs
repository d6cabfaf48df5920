//! Outbound calls awaiting a station's reply

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::identity::ChargerIdentity;
use crate::shared::errors::{DomainError, DomainResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingCallStatus {
    Pending,
    Completed,
    Failed,
    TimedOut,
}

impl PendingCallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::TimedOut => "TimedOut",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl FromStr for PendingCallStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Completed" => Ok(Self::Completed),
            "Failed" => Ok(Self::Failed),
            "TimedOut" => Ok(Self::TimedOut),
            other => Err(DomainError::Validation(format!("unknown pending call status {}", other))),
        }
    }
}

impl fmt::Display for PendingCallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A CSMS-initiated call. Exactly one record exists per `message_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCall {
    pub message_id: String,
    pub identity: ChargerIdentity,
    pub action: String,
    pub request_payload: Value,
    pub sent_at: DateTime<Utc>,
    pub timeout_at: DateTime<Utc>,
    pub status: PendingCallStatus,
    pub result_payload: Option<Value>,
    /// CallError body (`{"code", "description", "details"}`) or timeout reason
    pub error_payload: Option<Value>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PendingCall {
    pub fn new(
        message_id: impl Into<String>,
        identity: ChargerIdentity,
        action: impl Into<String>,
        request_payload: Value,
        sent_at: DateTime<Utc>,
        timeout_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            identity,
            action: action.into(),
            request_payload,
            sent_at,
            timeout_at,
            status: PendingCallStatus::Pending,
            result_payload: None,
            error_payload: None,
            resolved_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to a terminal state. Returns `false` and leaves the record
    /// untouched when it is already terminal.
    pub fn finish(
        &mut self,
        status: PendingCallStatus,
        result: Option<Value>,
        error: Option<Value>,
        at: DateTime<Utc>,
    ) -> bool {
        if self.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.result_payload = result;
        self.error_payload = error;
        self.resolved_at = Some(at);
        true
    }

    pub fn complete(&mut self, payload: Value, at: DateTime<Utc>) -> bool {
        self.finish(PendingCallStatus::Completed, Some(payload), None, at)
    }

    pub fn fail(&mut self, error: Value, at: DateTime<Utc>) -> bool {
        self.finish(PendingCallStatus::Failed, None, Some(error), at)
    }

    pub fn time_out(&mut self, reason: Option<Value>, at: DateTime<Utc>) -> bool {
        self.finish(PendingCallStatus::TimedOut, None, reason, at)
    }
}

/// Durable mirror of pending calls, shared across processes.
#[async_trait]
pub trait PendingCallStore: Send + Sync {
    async fn upsert(&self, call: &PendingCall) -> DomainResult<()>;
    async fn get(&self, message_id: &str) -> DomainResult<Option<PendingCall>>;
    async fn delete(&self, message_id: &str) -> DomainResult<()>;
    async fn list_pending(&self) -> DomainResult<Vec<PendingCall>>;

    /// Apply a terminal transition only if the stored record is still Pending.
    /// Returns the updated record, or `None` when there was nothing to apply.
    async fn finish_if_pending(
        &self,
        message_id: &str,
        status: PendingCallStatus,
        result: Option<Value>,
        error: Option<Value>,
        at: DateTime<Utc>,
    ) -> DomainResult<Option<PendingCall>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call() -> PendingCall {
        let now = Utc::now();
        PendingCall::new(
            "m-1",
            ChargerIdentity::aggregate("CP1"),
            "Reset",
            json!({"type": "Soft"}),
            now,
            now + chrono::Duration::seconds(30),
        )
    }

    #[test]
    fn first_terminal_write_wins() {
        let mut call = call();
        assert!(call.complete(json!({"status": "Accepted"}), Utc::now()));
        assert!(!call.time_out(None, Utc::now()));
        assert!(!call.fail(json!({"code": "InternalError"}), Utc::now()));

        assert_eq!(call.status, PendingCallStatus::Completed);
        assert_eq!(call.result_payload, Some(json!({"status": "Accepted"})));
        assert_eq!(call.error_payload, None);
    }

    #[test]
    fn cannot_finish_back_into_pending() {
        let mut call = call();
        assert!(!call.finish(PendingCallStatus::Pending, None, None, Utc::now()));
        assert!(call.resolved_at.is_none());
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            PendingCallStatus::Pending,
            PendingCallStatus::Completed,
            PendingCallStatus::Failed,
            PendingCallStatus::TimedOut,
        ] {
            assert_eq!(status.as_str().parse::<PendingCallStatus>().unwrap(), status);
        }
        assert!("Cancelled".parse::<PendingCallStatus>().is_err());
    }
}
