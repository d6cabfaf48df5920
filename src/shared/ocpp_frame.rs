//! OCPP-J message framing
//!
//! Implements the OCPP-J (JSON over WebSocket) transport envelope used by OCPP 1.6:
//!
//! - **Call**       `[2, "<uniqueId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<uniqueId>", {<payload>}]`
//! - **CallError**  `[4, "<uniqueId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`

use std::fmt;

use serde_json::Value;
use thiserror::Error;

// ── Message-type constants ─────────────────────────────────────

const MSG_TYPE_CALL: u64 = 2;
const MSG_TYPE_CALL_RESULT: u64 = 3;
const MSG_TYPE_CALL_ERROR: u64 = 4;

// ── Error codes ────────────────────────────────────────────────

/// OCPP 1.6 CallError codes emitted by the central system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcppErrorCode {
    /// Requested action is not known by the receiver
    NotImplemented,
    /// Requested action is recognized but not supported by the receiver
    NotSupported,
    /// An internal error occurred while processing the action
    InternalError,
    /// Payload for the action is incomplete or the frame is malformed
    ProtocolError,
    /// Payload is syntactically incorrect or does not conform to the action's schema
    FormationViolation,
    /// A field contains a value of the wrong type
    TypeConstraintViolation,
    /// Any other error
    GenericError,
}

impl OcppErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotImplemented => "NotImplemented",
            Self::NotSupported => "NotSupported",
            Self::InternalError => "InternalError",
            Self::ProtocolError => "ProtocolError",
            Self::FormationViolation => "FormationViolation",
            Self::TypeConstraintViolation => "TypeConstraintViolation",
            Self::GenericError => "GenericError",
        }
    }
}

impl fmt::Display for OcppErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── OcppFrame ──────────────────────────────────────────────────

/// A parsed OCPP-J frame.
#[derive(Debug, Clone, PartialEq)]
pub enum OcppFrame {
    /// `[2, uniqueId, action, payload]`
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    /// `[3, uniqueId, payload]`
    CallResult { unique_id: String, payload: Value },
    /// `[4, uniqueId, errorCode, errorDescription, errorDetails]`
    CallError {
        unique_id: String,
        error_code: String,
        error_description: String,
        error_details: Value,
    },
}

impl OcppFrame {
    // ── Parsing ────────────────────────────────────────────

    /// Parse a raw JSON text into an `OcppFrame`.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text).map_err(|e| FrameError {
            unique_id: None,
            kind: FrameErrorKind::InvalidJson(e.to_string()),
        })?;

        let arr = value.as_array().ok_or(FrameError {
            unique_id: None,
            kind: FrameErrorKind::NotAnArray,
        })?;

        // Best-effort id so a CallError can still be correlated
        let unique_id = arr.get(1).and_then(Value::as_str).map(str::to_string);
        let fail = |kind| FrameError {
            unique_id: unique_id.clone(),
            kind,
        };

        if arr.is_empty() {
            return Err(fail(FrameErrorKind::EmptyArray));
        }

        let msg_type = arr[0]
            .as_u64()
            .ok_or_else(|| fail(FrameErrorKind::InvalidMessageType))?;

        let min_len = match msg_type {
            MSG_TYPE_CALL => 4,
            MSG_TYPE_CALL_RESULT => 2,
            MSG_TYPE_CALL_ERROR => 3,
            other => return Err(fail(FrameErrorKind::UnknownMessageType(other))),
        };
        if arr.len() < min_len {
            return Err(fail(FrameErrorKind::MissingFields {
                expected: min_len,
                got: arr.len(),
            }));
        }

        let unique_id = unique_id
            .clone()
            .ok_or_else(|| fail(FrameErrorKind::FieldTypeMismatch("uniqueId must be a string")))?;

        match msg_type {
            MSG_TYPE_CALL => {
                let action = arr[2]
                    .as_str()
                    .ok_or_else(|| fail(FrameErrorKind::FieldTypeMismatch("action must be a string")))?
                    .to_string();
                let payload = arr[3].clone();
                if !payload.is_object() {
                    return Err(fail(FrameErrorKind::FieldTypeMismatch(
                        "payload must be an object",
                    )));
                }
                Ok(Self::Call {
                    unique_id,
                    action,
                    payload,
                })
            }
            MSG_TYPE_CALL_RESULT => {
                let payload = match arr.get(2) {
                    Some(Value::Null) | None => Value::Object(Default::default()),
                    Some(v) => v.clone(),
                };
                Ok(Self::CallResult { unique_id, payload })
            }
            _ => {
                let error_code = arr[2].as_str().unwrap_or("GenericError").to_string();
                let error_description = arr
                    .get(3)
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                let error_details = arr
                    .get(4)
                    .cloned()
                    .unwrap_or(Value::Object(Default::default()));
                Ok(Self::CallError {
                    unique_id,
                    error_code,
                    error_description,
                    error_details,
                })
            }
        }
    }

    // ── Serialization ──────────────────────────────────────

    /// Serialize this frame to a JSON string.
    pub fn serialize(&self) -> String {
        let arr = match self {
            Self::Call {
                unique_id,
                action,
                payload,
            } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL.into()),
                Value::String(unique_id.clone()),
                Value::String(action.clone()),
                payload.clone(),
            ]),

            Self::CallResult { unique_id, payload } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL_RESULT.into()),
                Value::String(unique_id.clone()),
                payload.clone(),
            ]),

            Self::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL_ERROR.into()),
                Value::String(unique_id.clone()),
                Value::String(error_code.clone()),
                Value::String(error_description.clone()),
                error_details.clone(),
            ]),
        };

        arr.to_string()
    }

    // ── Helpers ────────────────────────────────────────────

    /// Get the unique message ID.
    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call { unique_id, .. }
            | Self::CallResult { unique_id, .. }
            | Self::CallError { unique_id, .. } => unique_id,
        }
    }

    /// Create a `CallError` response for a given unique ID.
    pub fn error_response(
        unique_id: impl Into<String>,
        error_code: OcppErrorCode,
        error_description: impl Into<String>,
    ) -> Self {
        Self::CallError {
            unique_id: unique_id.into(),
            error_code: error_code.as_str().to_string(),
            error_description: error_description.into(),
            error_details: Value::Object(Default::default()),
        }
    }

    /// Returns `true` if this is a `Call` frame.
    pub fn is_call(&self) -> bool {
        matches!(self, Self::Call { .. })
    }

    /// Returns `true` if this is a `CallResult` frame.
    pub fn is_call_result(&self) -> bool {
        matches!(self, Self::CallResult { .. })
    }

    /// Returns `true` if this is a `CallError` frame.
    pub fn is_call_error(&self) -> bool {
        matches!(self, Self::CallError { .. })
    }
}

// ── Errors ─────────────────────────────────────────────────────

/// A frame that could not be decoded.
#[derive(Debug, Clone, Error)]
#[error("{kind}")]
pub struct FrameError {
    /// Message id recovered from the raw frame, if any
    pub unique_id: Option<String>,
    pub kind: FrameErrorKind,
}

impl FrameError {
    /// The CallError code this failure is reported with.
    pub fn error_code(&self) -> OcppErrorCode {
        match self.kind {
            FrameErrorKind::FieldTypeMismatch(_) => OcppErrorCode::TypeConstraintViolation,
            FrameErrorKind::InvalidJson(_) => OcppErrorCode::FormationViolation,
            _ => OcppErrorCode::ProtocolError,
        }
    }

    /// Build the `CallError` frame that answers this failure.
    pub fn to_call_error(&self) -> OcppFrame {
        OcppFrame::error_response(
            self.unique_id.clone().unwrap_or_default(),
            self.error_code(),
            self.to_string(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameErrorKind {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("OCPP message must be a JSON array")]
    NotAnArray,
    #[error("Empty OCPP message array")]
    EmptyArray,
    #[error("Message type is not a number")]
    InvalidMessageType,
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u64),
    #[error("Expected at least {expected} fields, got {got}")]
    MissingFields { expected: usize, got: usize },
    #[error("Field type mismatch: {0}")]
    FieldTypeMismatch(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_call() {
        let text = r#"[2,"abc123","BootNotification",{"chargePointVendor":"Vendor","chargePointModel":"Model"}]"#;
        let frame = OcppFrame::parse(text).unwrap();
        match frame {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => {
                assert_eq!(unique_id, "abc123");
                assert_eq!(action, "BootNotification");
                assert_eq!(payload["chargePointVendor"], "Vendor");
            }
            _ => panic!("Expected Call frame"),
        }
    }

    #[test]
    fn parse_call_result_without_payload_defaults_to_empty_object() {
        let frame = OcppFrame::parse(r#"[3,"abc123"]"#).unwrap();
        match frame {
            OcppFrame::CallResult { unique_id, payload } => {
                assert_eq!(unique_id, "abc123");
                assert_eq!(payload, serde_json::json!({}));
            }
            _ => panic!("Expected CallResult frame"),
        }
    }

    #[test]
    fn parse_call_error_fills_missing_description() {
        let frame = OcppFrame::parse(r#"[4,"abc123","NotImplemented"]"#).unwrap();
        match frame {
            OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => {
                assert_eq!(unique_id, "abc123");
                assert_eq!(error_code, "NotImplemented");
                assert_eq!(error_description, "");
                assert_eq!(error_details, serde_json::json!({}));
            }
            _ => panic!("Expected CallError frame"),
        }
    }

    #[test]
    fn malformed_call_keeps_message_id() {
        let err = OcppFrame::parse(r#"[2,"m-1","Heartbeat"]"#).unwrap_err();
        assert_eq!(err.unique_id.as_deref(), Some("m-1"));
        assert_eq!(err.error_code(), OcppErrorCode::ProtocolError);

        match err.to_call_error() {
            OcppFrame::CallError {
                unique_id,
                error_code,
                ..
            } => {
                assert_eq!(unique_id, "m-1");
                assert_eq!(error_code, "ProtocolError");
            }
            _ => panic!("Expected CallError frame"),
        }
    }

    #[test]
    fn invalid_json_is_formation_violation() {
        let err = OcppFrame::parse("[2,\"x\",").unwrap_err();
        assert!(err.unique_id.is_none());
        assert_eq!(err.error_code(), OcppErrorCode::FormationViolation);
    }

    #[test]
    fn unknown_message_type_rejected() {
        let err = OcppFrame::parse(r#"[7,"id","X",{}]"#).unwrap_err();
        assert_eq!(err.kind, FrameErrorKind::UnknownMessageType(7));
    }

    #[test]
    fn non_object_call_payload_rejected() {
        let err = OcppFrame::parse(r#"[2,"id","Heartbeat",[]]"#).unwrap_err();
        assert_eq!(err.error_code(), OcppErrorCode::TypeConstraintViolation);
    }

    #[test]
    fn serialized_call_error_has_five_elements() {
        let frame = OcppFrame::error_response("id3", OcppErrorCode::GenericError, "boom");
        let value: Value = serde_json::from_str(&frame.serialize()).unwrap();
        assert_eq!(value.as_array().map(Vec::len), Some(5));
        assert_eq!(value[2], "GenericError");
    }
}
