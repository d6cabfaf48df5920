//! BootNotification handler

use chrono::Utc;
use rust_ocpp::v1_6::messages::boot_notification::{
    BootNotificationRequest, BootNotificationResponse,
};
use rust_ocpp::v1_6::types::RegistrationStatus;
use serde_json::{json, Map, Value};
use tracing::{error, info};

use super::parse_payload;
use crate::application::handlers::actions::InboundAction;
use crate::application::handlers::{CallOutcome, HandlerResult, OcppHandlerV16};

pub async fn handle_boot_notification(handler: &OcppHandlerV16, payload: &Value) -> HandlerResult {
    let req: BootNotificationRequest = parse_payload(InboundAction::BootNotification, payload)?;

    info!(
        charge_point_id = %handler.identity,
        vendor = req.charge_point_vendor.as_str(),
        model = req.charge_point_model.as_str(),
        firmware = ?req.firmware_version,
        "BootNotification"
    );

    let mut details = Map::new();
    details.insert("vendor".into(), json!(req.charge_point_vendor));
    details.insert("model".into(), json!(req.charge_point_model));
    details.insert("serialNumber".into(), json!(req.charge_point_serial_number));
    details.insert("chargeBoxSerialNumber".into(), json!(req.charge_box_serial_number));
    details.insert("firmwareVersion".into(), json!(req.firmware_version));
    details.insert("iccid".into(), json!(req.iccid));
    details.insert("imsi".into(), json!(req.imsi));
    details.insert("meterType".into(), json!(req.meter_type));
    details.insert("meterSerialNumber".into(), json!(req.meter_serial_number));
    details.insert("bootedAt".into(), json!(Utc::now()));

    // A failed write does not reject the station
    if let Err(e) = handler
        .system
        .statuses
        .record_details(&handler.identity, details)
        .await
    {
        error!(charge_point_id = %handler.identity, error = %e, "Failed to record boot details");
    }

    Ok(CallOutcome::typed(&BootNotificationResponse {
        current_time: Utc::now(),
        interval: handler.system.heartbeat_interval,
        status: RegistrationStatus::Accepted,
    }))
}
