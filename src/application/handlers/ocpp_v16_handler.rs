//! OCPP 1.6 message handler
//!
//! Parses raw OCPP-J frames, dispatches Calls to action handlers and
//! forwards CallResult / CallError frames to the pending-call registry.
//! Every frame appends exactly one session-log line.

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::actions::{InboundAction, UnknownAction};
use super::ocpp_v16::action_matcher;
use super::{CallFault, CallOutcome};
use crate::application::central_system::SharedCentralSystem;
use crate::application::commands::Resolution;
use crate::application::session::{Direction, EntryKind, LogEntry, StreamKey};
use crate::domain::ChargerIdentity;
use crate::shared::ocpp_frame::{OcppErrorCode, OcppFrame};

/// Handler for one connection's OCPP 1.6 traffic
pub struct OcppHandlerV16 {
    pub identity: ChargerIdentity,
    pub system: SharedCentralSystem,
}

impl OcppHandlerV16 {
    pub fn new(identity: ChargerIdentity, system: SharedCentralSystem) -> Self {
        Self { identity, system }
    }

    /// Process one text frame. Returns the frame to send back, if any.
    pub async fn handle(&self, text: &str) -> Option<String> {
        debug!(charge_point_id = %self.identity, "<- {}", text);
        self.system.sessions.touch(&self.identity);

        let frame = match OcppFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    charge_point_id = %self.identity,
                    error = %e,
                    raw = text,
                    "Malformed OCPP frame"
                );
                let reply = e.to_call_error();
                let mut entry =
                    LogEntry::new(self.identity.clone(), Direction::Inbound, EntryKind::CallError)
                        .detail(json!({ "code": e.error_code().as_str(), "error": e.to_string() }));
                if let Some(id) = &e.unique_id {
                    entry = entry.message_id(id);
                }
                self.system.log.append(entry);
                return Some(reply.serialize());
            }
        };

        match frame {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => Some(self.handle_call(&unique_id, &action, payload).await),

            OcppFrame::CallResult { unique_id, payload } => {
                self.handle_call_result(&unique_id, payload).await;
                None
            }

            OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => {
                self.handle_call_error(&unique_id, &error_code, &error_description, error_details)
                    .await;
                None
            }
        }
    }

    async fn handle_call(&self, unique_id: &str, action: &str, payload: Value) -> String {
        metrics::counter!("ocpp_inbound_calls_total", "action" => action.to_string()).increment(1);

        let result = match action.parse::<InboundAction>() {
            Ok(inbound) => action_matcher(self, inbound, &payload).await,
            Err(UnknownAction::WrongDirection) => Err(CallFault::new(
                OcppErrorCode::NotSupported,
                format!("{} is sent by the central system, not by a charge point", action),
            )),
            Err(UnknownAction::NotImplemented) => Err(CallFault::new(
                OcppErrorCode::NotImplemented,
                format!("Unknown action: {}", action),
            )),
        };

        let connector_id = payload
            .get("connectorId")
            .and_then(Value::as_u64)
            .map(|c| c as u32);
        let caused_by = self
            .system
            .follow_ups
            .consume(&self.identity.serial_number, action, connector_id);

        let (reply, entry, close) = match result {
            Ok(CallOutcome {
                payload: response,
                transaction_id,
                closes_transaction,
            }) => {
                let entry = LogEntry::new(self.identity.clone(), Direction::Inbound, EntryKind::Call)
                    .message_id(unique_id)
                    .action(action)
                    .detail(json!({ "request": payload, "response": response }))
                    .caused_by(caused_by)
                    .transaction(transaction_id);
                let reply = OcppFrame::CallResult {
                    unique_id: unique_id.to_string(),
                    payload: response,
                };
                (reply, entry, closes_transaction)
            }
            Err(fault) => {
                warn!(
                    charge_point_id = %self.identity,
                    action,
                    code = %fault.code,
                    description = fault.description.as_str(),
                    "Call answered with CallError"
                );
                let entry = LogEntry::new(self.identity.clone(), Direction::Inbound, EntryKind::Call)
                    .message_id(unique_id)
                    .action(action)
                    .detail(json!({
                        "request": payload,
                        "error": { "code": fault.code.as_str(), "description": fault.description },
                    }))
                    .caused_by(caused_by);
                let reply = OcppFrame::error_response(unique_id, fault.code, fault.description);
                (reply, entry, false)
            }
        };

        let transaction_id = entry.transaction_id;
        self.system.log.append(entry);
        if let (true, Some(id)) = (close, transaction_id) {
            self.system.log.close(&StreamKey::Transaction(id));
        }

        reply.serialize()
    }

    async fn handle_call_result(&self, unique_id: &str, payload: Value) {
        let resolution = self.system.pending_calls.resolve(unique_id, payload.clone()).await;
        self.log_reply(unique_id, EntryKind::CallResult, payload, resolution);
    }

    async fn handle_call_error(
        &self,
        unique_id: &str,
        error_code: &str,
        error_description: &str,
        error_details: Value,
    ) {
        warn!(
            charge_point_id = %self.identity,
            message_id = unique_id,
            error_code,
            error_description,
            "Received CallError"
        );
        let resolution = self
            .system
            .pending_calls
            .reject(unique_id, error_code, error_description, error_details.clone())
            .await;
        let detail = json!({
            "code": error_code,
            "description": error_description,
            "details": error_details,
        });
        self.log_reply(unique_id, EntryKind::CallError, detail, resolution);
    }

    fn log_reply(
        &self,
        unique_id: &str,
        kind: EntryKind,
        detail: Value,
        resolution: crate::domain::DomainResult<Resolution>,
    ) {
        let (action, outcome) = match &resolution {
            Ok(Resolution::Applied(call)) => (Some(call.action.clone()), "applied"),
            Ok(Resolution::AlreadyTerminal(call)) => (Some(call.action.clone()), "already_terminal"),
            Ok(Resolution::Unknown) => (None, "unknown_call"),
            Err(e) => {
                warn!(
                    charge_point_id = %self.identity,
                    message_id = unique_id,
                    error = %e,
                    "Failed to apply reply to pending call"
                );
                (None, "error")
            }
        };
        info!(
            charge_point_id = %self.identity,
            message_id = unique_id,
            kind = %kind,
            outcome,
            "Reply received"
        );

        let mut entry = LogEntry::new(self.identity.clone(), Direction::Inbound, kind)
            .message_id(unique_id)
            .detail(json!({ "payload": detail, "outcome": outcome }));
        if let Some(action) = action {
            entry = entry.action(action);
        }
        self.system.log.append(entry);
    }
}
