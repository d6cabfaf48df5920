//! FirmwareStatusNotification handler

use rust_ocpp::v1_6::messages::firmware_status_notification::{
    FirmwareStatusNotificationRequest, FirmwareStatusNotificationResponse,
};
use serde_json::{json, Map, Value};
use tracing::{error, info};

use super::parse_payload;
use crate::application::handlers::actions::InboundAction;
use crate::application::handlers::{CallOutcome, HandlerResult, OcppHandlerV16};

pub async fn handle_firmware_status_notification(
    handler: &OcppHandlerV16,
    payload: &Value,
) -> HandlerResult {
    let req: FirmwareStatusNotificationRequest =
        parse_payload(InboundAction::FirmwareStatusNotification, payload)?;

    info!(
        charge_point_id = %handler.identity,
        status = ?req.status,
        "FirmwareStatusNotification"
    );

    let mut details = Map::new();
    details.insert("firmwareStatus".into(), json!(req.status));
    if let Err(e) = handler
        .system
        .statuses
        .record_details(&handler.identity, details)
        .await
    {
        error!(charge_point_id = %handler.identity, error = %e, "Failed to record firmware status");
    }

    Ok(CallOutcome::typed(&FirmwareStatusNotificationResponse {}))
}
