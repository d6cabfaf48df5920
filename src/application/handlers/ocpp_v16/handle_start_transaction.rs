//! StartTransaction handler

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::messages::start_transaction::StartTransactionResponse;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::{id_tag_info, parse_payload};
use crate::application::charging::StartRequest;
use crate::application::handlers::actions::InboundAction;
use crate::application::handlers::{CallFault, CallOutcome, HandlerResult, OcppHandlerV16};

/// `meterStart` and `timestamp` are optional here; some stations omit them.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartTransactionPayload {
    #[serde(default)]
    connector_id: u32,
    id_tag: String,
    meter_start: Option<i64>,
    timestamp: Option<DateTime<Utc>>,
    reservation_id: Option<i32>,
}

pub async fn handle_start_transaction(handler: &OcppHandlerV16, payload: &Value) -> HandlerResult {
    let req: StartTransactionPayload = parse_payload(InboundAction::StartTransaction, payload)?;

    info!(
        charge_point_id = %handler.identity,
        connector_id = req.connector_id,
        id_tag = req.id_tag.as_str(),
        meter_start = ?req.meter_start,
        reservation_id = ?req.reservation_id,
        "StartTransaction"
    );

    let outcome = handler
        .system
        .transactions
        .start(
            &handler.identity,
            StartRequest {
                connector_id: req.connector_id,
                id_tag: req.id_tag,
                meter_start: req.meter_start,
                timestamp: req.timestamp,
            },
        )
        .await
        .map_err(CallFault::internal)?;

    let response = StartTransactionResponse {
        transaction_id: outcome.transaction_id,
        id_tag_info: id_tag_info(&outcome.authorization),
    };
    Ok(CallOutcome::typed(&response).for_transaction(Some(outcome.transaction_id)))
}
