//! OCPP message handlers

pub mod actions;
mod ocpp_v16;
mod ocpp_v16_handler;

use serde::Serialize;
use serde_json::Value;

use crate::shared::ocpp_frame::OcppErrorCode;

pub use actions::{InboundAction, UnknownAction};
pub use ocpp_v16_handler::OcppHandlerV16;

/// What an action handler produced for an accepted Call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    pub payload: Value,
    /// Transaction the call belongs to, for the session log
    pub transaction_id: Option<i32>,
    /// The transaction's log stream closes after this call is logged
    pub closes_transaction: bool,
}

impl CallOutcome {
    pub fn reply(payload: Value) -> Self {
        Self {
            payload,
            transaction_id: None,
            closes_transaction: false,
        }
    }

    /// Serialize a typed response. Serialization of the response types
    /// cannot fail in practice; an empty object is sent if it ever does.
    pub fn typed<T: Serialize>(response: &T) -> Self {
        Self::reply(serde_json::to_value(response).unwrap_or_default())
    }

    pub fn for_transaction(mut self, transaction_id: Option<i32>) -> Self {
        self.transaction_id = transaction_id.filter(|id| *id > 0);
        self
    }

    pub fn closing_transaction(mut self) -> Self {
        self.closes_transaction = self.transaction_id.is_some();
        self
    }
}

/// A Call that is answered with a CallError.
#[derive(Debug, Clone, PartialEq)]
pub struct CallFault {
    pub code: OcppErrorCode,
    pub description: String,
}

impl CallFault {
    pub fn new(code: OcppErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    pub fn internal(error: impl std::fmt::Display) -> Self {
        Self::new(OcppErrorCode::InternalError, error.to_string())
    }
}

pub type HandlerResult = Result<CallOutcome, CallFault>;
