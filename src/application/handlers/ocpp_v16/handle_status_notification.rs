//! StatusNotification handler
//!
//! Status and error code are kept as raw strings so vendor-specific values
//! are stored instead of rejected.

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::messages::status_notification::StatusNotificationResponse;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::parse_payload;
use crate::application::charging::StatusReport;
use crate::application::handlers::actions::InboundAction;
use crate::application::handlers::{CallFault, CallOutcome, HandlerResult, OcppHandlerV16};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusNotificationPayload {
    #[serde(default)]
    connector_id: u32,
    status: String,
    error_code: Option<String>,
    info: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    vendor_id: Option<String>,
    vendor_error_code: Option<String>,
}

pub async fn handle_status_notification(handler: &OcppHandlerV16, payload: &Value) -> HandlerResult {
    let req: StatusNotificationPayload = parse_payload(InboundAction::StatusNotification, payload)?;

    info!(
        charge_point_id = %handler.identity,
        connector_id = req.connector_id,
        status = req.status.as_str(),
        error_code = ?req.error_code,
        "StatusNotification"
    );

    handler
        .system
        .statuses
        .apply_report(
            &handler.identity,
            StatusReport {
                connector_id: req.connector_id,
                status: req.status,
                error_code: req.error_code,
                info: req.info,
                vendor_id: req.vendor_id,
                vendor_error_code: req.vendor_error_code,
                timestamp: req.timestamp,
            },
        )
        .await
        .map_err(CallFault::internal)?;

    Ok(CallOutcome::typed(&StatusNotificationResponse {}))
}
