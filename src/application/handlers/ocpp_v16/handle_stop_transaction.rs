//! StopTransaction handler
//!
//! Always answered with a CallResult: an unknown transaction id is recorded
//! as a placeholder and a repeated stop is acknowledged again.

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::messages::stop_transaction::StopTransactionResponse;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::{id_tag_info, parse_payload, samples_from, MeterValuePayload};
use crate::application::charging::StopRequest;
use crate::application::handlers::actions::InboundAction;
use crate::application::handlers::{CallFault, CallOutcome, HandlerResult, OcppHandlerV16};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopTransactionPayload {
    transaction_id: i32,
    id_tag: Option<String>,
    meter_stop: Option<i64>,
    timestamp: Option<DateTime<Utc>>,
    reason: Option<String>,
    #[serde(default)]
    transaction_data: Vec<MeterValuePayload>,
}

pub async fn handle_stop_transaction(handler: &OcppHandlerV16, payload: &Value) -> HandlerResult {
    let req: StopTransactionPayload = parse_payload(InboundAction::StopTransaction, payload)?;

    info!(
        charge_point_id = %handler.identity,
        transaction_id = req.transaction_id,
        meter_stop = ?req.meter_stop,
        reason = ?req.reason,
        "StopTransaction"
    );

    let outcome = handler
        .system
        .transactions
        .stop(
            &handler.identity,
            StopRequest {
                transaction_id: req.transaction_id,
                id_tag: req.id_tag,
                meter_stop: req.meter_stop,
                timestamp: req.timestamp,
                reason: req.reason,
                samples: samples_from(req.transaction_data),
            },
        )
        .await
        .map_err(CallFault::internal)?;

    let response = StopTransactionResponse {
        id_tag_info: Some(id_tag_info(&outcome.authorization)),
    };
    let result = CallOutcome::typed(&response).for_transaction(Some(outcome.transaction.id));
    Ok(if outcome.already_stopped {
        result
    } else {
        result.closing_transaction()
    })
}
