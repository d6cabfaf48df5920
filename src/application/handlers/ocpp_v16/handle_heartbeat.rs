//! Heartbeat handler

use chrono::Utc;
use rust_ocpp::v1_6::messages::heart_beat::HeartbeatResponse;
use serde_json::Value;
use tracing::{debug, error};

use crate::application::handlers::{CallOutcome, HandlerResult, OcppHandlerV16};

pub async fn handle_heartbeat(handler: &OcppHandlerV16, _payload: &Value) -> HandlerResult {
    debug!(charge_point_id = %handler.identity, "Heartbeat");

    if let Err(e) = handler.system.statuses.record_heartbeat(&handler.identity).await {
        error!(charge_point_id = %handler.identity, error = %e, "Failed to record heartbeat");
    }

    Ok(CallOutcome::typed(&HeartbeatResponse {
        current_time: Utc::now(),
    }))
}
