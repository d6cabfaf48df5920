//! DataTransfer handler
//!
//! Vendor payloads are opaque; every transfer is acknowledged.

use rust_ocpp::v1_6::messages::data_transfer::{DataTransferRequest, DataTransferResponse};
use rust_ocpp::v1_6::types::DataTransferStatus;
use serde_json::Value;
use tracing::info;

use super::parse_payload;
use crate::application::handlers::actions::InboundAction;
use crate::application::handlers::{CallOutcome, HandlerResult, OcppHandlerV16};

pub async fn handle_data_transfer(handler: &OcppHandlerV16, payload: &Value) -> HandlerResult {
    let req: DataTransferRequest = parse_payload(InboundAction::DataTransfer, payload)?;

    info!(
        charge_point_id = %handler.identity,
        vendor_id = req.vendor_string.as_str(),
        message_id = ?req.message_id,
        data_len = req.data.as_ref().map(|d| d.len()).unwrap_or(0),
        "DataTransfer"
    );

    Ok(CallOutcome::typed(&DataTransferResponse {
        status: DataTransferStatus::Accepted,
        data: None,
    }))
}
