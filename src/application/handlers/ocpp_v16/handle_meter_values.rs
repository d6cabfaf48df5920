//! MeterValues handler

use rust_ocpp::v1_6::messages::meter_values::MeterValuesResponse;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::{parse_payload, samples_from, MeterValuePayload};
use crate::application::handlers::actions::InboundAction;
use crate::application::handlers::{CallFault, CallOutcome, HandlerResult, OcppHandlerV16};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeterValuesPayload {
    #[serde(default)]
    connector_id: u32,
    transaction_id: Option<i32>,
    #[serde(default)]
    meter_value: Vec<MeterValuePayload>,
}

pub async fn handle_meter_values(handler: &OcppHandlerV16, payload: &Value) -> HandlerResult {
    let req: MeterValuesPayload = parse_payload(InboundAction::MeterValues, payload)?;
    let samples = samples_from(req.meter_value);

    info!(
        charge_point_id = %handler.identity,
        connector_id = req.connector_id,
        transaction_id = ?req.transaction_id,
        samples = samples.len(),
        "MeterValues"
    );

    let attached = handler
        .system
        .transactions
        .record_meter_values(&handler.identity, req.connector_id, req.transaction_id, samples)
        .await
        .map_err(CallFault::internal)?;

    Ok(CallOutcome::typed(&MeterValuesResponse {}).for_transaction(attached))
}
