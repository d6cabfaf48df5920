//! DiagnosticsStatusNotification handler

use rust_ocpp::v1_6::messages::diagnostics_status_notification::{
    DiagnosticsStatusNotificationRequest, DiagnosticsStatusNotificationResponse,
};
use serde_json::{json, Map, Value};
use tracing::{error, info};

use super::parse_payload;
use crate::application::handlers::actions::InboundAction;
use crate::application::handlers::{CallOutcome, HandlerResult, OcppHandlerV16};

pub async fn handle_diagnostics_status_notification(
    handler: &OcppHandlerV16,
    payload: &Value,
) -> HandlerResult {
    let req: DiagnosticsStatusNotificationRequest =
        parse_payload(InboundAction::DiagnosticsStatusNotification, payload)?;

    info!(
        charge_point_id = %handler.identity,
        status = ?req.status,
        "DiagnosticsStatusNotification"
    );

    let mut details = Map::new();
    details.insert("diagnosticsStatus".into(), json!(req.status));
    if let Err(e) = handler
        .system
        .statuses
        .record_details(&handler.identity, details)
        .await
    {
        error!(charge_point_id = %handler.identity, error = %e, "Failed to record diagnostics status");
    }

    Ok(CallOutcome::typed(&DiagnosticsStatusNotificationResponse {}))
}
