//! OCPP 1.6 action handlers
//!
//! One module per inbound action. Payloads are deserialized into
//! `rust_ocpp::v1_6` types, or into local tolerant structs where stations
//! commonly send vendor-specific values.

mod handle_authorize;
mod handle_boot_notification;
mod handle_data_transfer;
mod handle_diagnostics_status_notification;
mod handle_firmware_status_notification;
mod handle_heartbeat;
mod handle_meter_values;
mod handle_start_transaction;
mod handle_status_notification;
mod handle_stop_transaction;

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::types::{AuthorizationStatus, IdTagInfo};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::actions::InboundAction;
use super::{CallFault, HandlerResult, OcppHandlerV16};
use crate::application::charging::{Authorization, Sample};
use crate::domain::transaction::model::ENERGY_MEASURAND;
use crate::domain::AccountStatus;
use crate::shared::ocpp_frame::OcppErrorCode;

use handle_authorize::handle_authorize;
use handle_boot_notification::handle_boot_notification;
use handle_data_transfer::handle_data_transfer;
use handle_diagnostics_status_notification::handle_diagnostics_status_notification;
use handle_firmware_status_notification::handle_firmware_status_notification;
use handle_heartbeat::handle_heartbeat;
use handle_meter_values::handle_meter_values;
use handle_start_transaction::handle_start_transaction;
use handle_status_notification::handle_status_notification;
use handle_stop_transaction::handle_stop_transaction;

/// Route an OCPP 1.6 action to its handler
pub(super) async fn action_matcher(
    handler: &OcppHandlerV16,
    action: InboundAction,
    payload: &Value,
) -> HandlerResult {
    match action {
        InboundAction::BootNotification => handle_boot_notification(handler, payload).await,
        InboundAction::Heartbeat => handle_heartbeat(handler, payload).await,
        InboundAction::StatusNotification => handle_status_notification(handler, payload).await,
        InboundAction::Authorize => handle_authorize(handler, payload).await,
        InboundAction::StartTransaction => handle_start_transaction(handler, payload).await,
        InboundAction::StopTransaction => handle_stop_transaction(handler, payload).await,
        InboundAction::MeterValues => handle_meter_values(handler, payload).await,
        InboundAction::DiagnosticsStatusNotification => {
            handle_diagnostics_status_notification(handler, payload).await
        }
        InboundAction::FirmwareStatusNotification => {
            handle_firmware_status_notification(handler, payload).await
        }
        InboundAction::DataTransfer => handle_data_transfer(handler, payload).await,
    }
}

/// Deserialize a Call payload, answering schema mismatches with
/// `FormationViolation`.
fn parse_payload<T: DeserializeOwned>(action: InboundAction, payload: &Value) -> Result<T, CallFault> {
    serde_json::from_value(payload.clone()).map_err(|e| {
        CallFault::new(
            OcppErrorCode::FormationViolation,
            format!("Invalid {} payload: {}", action.as_str(), e),
        )
    })
}

fn id_tag_info(authorization: &Authorization) -> IdTagInfo {
    let status = match authorization.status {
        AccountStatus::Accepted => AuthorizationStatus::Accepted,
        AccountStatus::Blocked => AuthorizationStatus::Blocked,
        AccountStatus::Expired => AuthorizationStatus::Expired,
        AccountStatus::Invalid => AuthorizationStatus::Invalid,
        AccountStatus::ConcurrentTx => AuthorizationStatus::ConcurrentTx,
    };
    IdTagInfo {
        status,
        expiry_date: authorization.expiry_date,
        parent_id_tag: authorization.parent_id_tag.clone(),
    }
}

// ── Meter samples ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeterValuePayload {
    timestamp: DateTime<Utc>,
    #[serde(default)]
    sampled_value: Vec<SampledValuePayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SampledValuePayload {
    value: String,
    context: Option<String>,
    measurand: Option<String>,
    unit: Option<String>,
}

/// Flatten OCPP `meterValue` entries into samples. A missing measurand
/// means the energy register.
fn samples_from(meter_values: Vec<MeterValuePayload>) -> Vec<Sample> {
    meter_values
        .into_iter()
        .flat_map(|mv| {
            let timestamp = mv.timestamp;
            mv.sampled_value.into_iter().map(move |sv| Sample {
                timestamp,
                measurand: sv.measurand.unwrap_or_else(|| ENERGY_MEASURAND.to_string()),
                value: sv.value,
                context: sv.context,
                unit: sv.unit,
            })
        })
        .collect()
}
