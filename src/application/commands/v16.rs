//! Typed OCPP 1.6 command helpers
//!
//! Each helper builds the `rust_ocpp` request, submits it through the
//! pending-call registry, waits for the terminal outcome and parses the
//! typed response. Catalog actions without a helper go through
//! [`PendingCallRegistry::submit`] with an opaque payload.

use rust_ocpp::v1_6::messages::change_availability::{
    ChangeAvailabilityRequest, ChangeAvailabilityResponse,
};
use rust_ocpp::v1_6::messages::change_configuration::{
    ChangeConfigurationRequest, ChangeConfigurationResponse,
};
use rust_ocpp::v1_6::messages::data_transfer::{DataTransferRequest, DataTransferResponse};
use rust_ocpp::v1_6::messages::get_configuration::{
    GetConfigurationRequest, GetConfigurationResponse,
};
use rust_ocpp::v1_6::messages::remote_start_transaction::{
    RemoteStartTransactionRequest, RemoteStartTransactionResponse,
};
use rust_ocpp::v1_6::messages::remote_stop_transaction::{
    RemoteStopTransactionRequest, RemoteStopTransactionResponse,
};
use rust_ocpp::v1_6::messages::reset::{ResetRequest, ResetResponse};
use rust_ocpp::v1_6::messages::trigger_message::{TriggerMessageRequest, TriggerMessageResponse};
use rust_ocpp::v1_6::types::{AvailabilityType, MessageTrigger, ResetRequestStatus};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use super::{CommandError, OutboundAction, PendingCallRegistry, SharedPendingCallRegistry};
use crate::domain::ChargerIdentity;

/// Reset kind
#[derive(Debug, Clone, Copy)]
pub enum ResetKind {
    Soft,
    Hard,
}

/// Target availability for ChangeAvailability
#[derive(Debug, Clone, Copy)]
pub enum Availability {
    Operative,
    Inoperative,
}

/// Notification a TriggerMessage asks for
#[derive(Debug, Clone, Copy)]
pub enum TriggerType {
    BootNotification,
    DiagnosticsStatusNotification,
    FirmwareStatusNotification,
    Heartbeat,
    MeterValues,
    StatusNotification,
}

/// Result of a DataTransfer command.
#[derive(Debug)]
pub struct DataTransferResult {
    pub status: String,
    pub data: Option<String>,
}

/// A configuration key-value pair returned by GetConfiguration.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub readonly: bool,
    pub value: Option<String>,
}

#[derive(Debug)]
pub struct ConfigurationResult {
    pub configuration_key: Vec<KeyValue>,
    pub unknown_key: Vec<String>,
}

async fn send<Req, Resp>(
    registry: &SharedPendingCallRegistry,
    identity: &ChargerIdentity,
    action: OutboundAction,
    request: &Req,
) -> Result<Resp, CommandError>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let payload = serde_json::to_value(request)
        .map_err(|e| CommandError::SendFailed(format!("Serialization failed: {}", e)))?;

    let result = PendingCallRegistry::call(registry, identity, action.as_str(), payload).await?;

    serde_json::from_value(result)
        .map_err(|e| CommandError::InvalidResponse(format!("Failed to parse response: {}", e)))
}

pub async fn remote_start_transaction(
    registry: &SharedPendingCallRegistry,
    identity: &ChargerIdentity,
    id_tag: &str,
    connector_id: Option<u32>,
) -> Result<String, CommandError> {
    info!(charge_point_id = %identity, id_tag, ?connector_id, "v1.6 RemoteStartTransaction");

    let request = RemoteStartTransactionRequest {
        connector_id,
        id_tag: id_tag.to_string(),
        charging_profile: None,
    };
    let response: RemoteStartTransactionResponse = send(
        registry,
        identity,
        OutboundAction::RemoteStartTransaction,
        &request,
    )
    .await?;

    Ok(format!("{:?}", response.status))
}

pub async fn remote_stop_transaction(
    registry: &SharedPendingCallRegistry,
    identity: &ChargerIdentity,
    transaction_id: i32,
) -> Result<String, CommandError> {
    info!(charge_point_id = %identity, transaction_id, "v1.6 RemoteStopTransaction");

    let request = RemoteStopTransactionRequest { transaction_id };
    let response: RemoteStopTransactionResponse = send(
        registry,
        identity,
        OutboundAction::RemoteStopTransaction,
        &request,
    )
    .await?;

    Ok(format!("{:?}", response.status))
}

pub async fn reset(
    registry: &SharedPendingCallRegistry,
    identity: &ChargerIdentity,
    reset_type: ResetKind,
) -> Result<String, CommandError> {
    info!(charge_point_id = %identity, ?reset_type, "v1.6 Reset");

    let kind = match reset_type {
        ResetKind::Soft => ResetRequestStatus::Soft,
        ResetKind::Hard => ResetRequestStatus::Hard,
    };
    let response: ResetResponse =
        send(registry, identity, OutboundAction::Reset, &ResetRequest { kind }).await?;

    Ok(format!("{:?}", response.status))
}

pub async fn change_availability(
    registry: &SharedPendingCallRegistry,
    identity: &ChargerIdentity,
    connector_id: u32,
    availability: Availability,
) -> Result<String, CommandError> {
    info!(charge_point_id = %identity, connector_id, ?availability, "v1.6 ChangeAvailability");

    let kind = match availability {
        Availability::Operative => AvailabilityType::Operative,
        Availability::Inoperative => AvailabilityType::Inoperative,
    };
    let request = ChangeAvailabilityRequest { connector_id, kind };
    let response: ChangeAvailabilityResponse = send(
        registry,
        identity,
        OutboundAction::ChangeAvailability,
        &request,
    )
    .await?;

    Ok(format!("{:?}", response.status))
}

pub async fn change_configuration(
    registry: &SharedPendingCallRegistry,
    identity: &ChargerIdentity,
    key: &str,
    value: &str,
) -> Result<String, CommandError> {
    info!(charge_point_id = %identity, key, value, "v1.6 ChangeConfiguration");

    let request = ChangeConfigurationRequest {
        key: key.to_string(),
        value: value.to_string(),
    };
    let response: ChangeConfigurationResponse = send(
        registry,
        identity,
        OutboundAction::ChangeConfiguration,
        &request,
    )
    .await?;

    Ok(format!("{:?}", response.status))
}

pub async fn data_transfer(
    registry: &SharedPendingCallRegistry,
    identity: &ChargerIdentity,
    vendor_id: &str,
    message_id: Option<String>,
    data: Option<String>,
) -> Result<DataTransferResult, CommandError> {
    info!(charge_point_id = %identity, vendor_id, ?message_id, "v1.6 DataTransfer");

    let request = DataTransferRequest {
        vendor_string: vendor_id.to_string(),
        message_id,
        data,
    };
    let response: DataTransferResponse =
        send(registry, identity, OutboundAction::DataTransfer, &request).await?;

    Ok(DataTransferResult {
        status: format!("{:?}", response.status),
        data: response.data,
    })
}

pub async fn get_configuration(
    registry: &SharedPendingCallRegistry,
    identity: &ChargerIdentity,
    keys: Option<Vec<String>>,
) -> Result<ConfigurationResult, CommandError> {
    info!(charge_point_id = %identity, ?keys, "v1.6 GetConfiguration");

    let request = GetConfigurationRequest { key: keys };
    let response: GetConfigurationResponse =
        send(registry, identity, OutboundAction::GetConfiguration, &request).await?;

    let configuration_key = response
        .configuration_key
        .unwrap_or_default()
        .into_iter()
        .map(|kv| KeyValue {
            key: kv.key,
            readonly: kv.readonly,
            value: kv.value,
        })
        .collect();

    Ok(ConfigurationResult {
        configuration_key,
        unknown_key: response.unknown_key.unwrap_or_default(),
    })
}

/// The registry records a follow-up marker for the requested notification.
pub async fn trigger_message(
    registry: &SharedPendingCallRegistry,
    identity: &ChargerIdentity,
    requested_message: TriggerType,
    connector_id: Option<u32>,
) -> Result<String, CommandError> {
    info!(charge_point_id = %identity, ?requested_message, ?connector_id, "v1.6 TriggerMessage");

    let trigger = match requested_message {
        TriggerType::BootNotification => MessageTrigger::BootNotification,
        TriggerType::DiagnosticsStatusNotification => {
            MessageTrigger::DiagnosticsStatusNotification
        }
        TriggerType::FirmwareStatusNotification => MessageTrigger::FirmwareStatusNotification,
        TriggerType::Heartbeat => MessageTrigger::Heartbeat,
        TriggerType::MeterValues => MessageTrigger::MeterValues,
        TriggerType::StatusNotification => MessageTrigger::StatusNotification,
    };
    let request = TriggerMessageRequest {
        requested_message: trigger,
        connector_id,
    };
    let response: TriggerMessageResponse =
        send(registry, identity, OutboundAction::TriggerMessage, &request).await?;

    Ok(format!("{:?}", response.status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::commands::{CommandTimeouts, TriggerFollowUps};
    use crate::application::events::EventBus;
    use crate::application::session::{SessionLog, SessionRegistry};
    use crate::infrastructure::storage::memory::InMemoryPendingCallStore;
    use crate::shared::ocpp_frame::OcppFrame;
    use serde_json::{json, Value};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Registry with one connected station that answers every call with `reply`.
    fn answering_station(reply: Value) -> (SharedPendingCallRegistry, ChargerIdentity, Arc<TriggerFollowUps>) {
        let sessions = SessionRegistry::shared(2);
        let follow_ups = Arc::new(TriggerFollowUps::new(Duration::from_secs(60)));
        let registry = Arc::new(PendingCallRegistry::new(
            sessions.clone(),
            Arc::new(SessionLog::default()),
            Arc::new(EventBus::new()),
            Arc::new(InMemoryPendingCallStore::new()),
            follow_ups.clone(),
            CommandTimeouts::default(),
        ));

        let identity = ChargerIdentity::aggregate("CP1");
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        sessions
            .register(identity.clone(), IpAddr::V4(Ipv4Addr::LOCALHOST), tx, None)
            .unwrap();

        let station_registry = registry.clone();
        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Ok(frame) = OcppFrame::parse(&text) {
                    let _ = station_registry
                        .resolve(frame.unique_id(), reply.clone())
                        .await;
                }
            }
        });
        (registry, identity, follow_ups)
    }

    #[tokio::test]
    async fn reset_parses_status() {
        let (registry, cp, _) = answering_station(json!({"status": "Accepted"}));
        let status = reset(&registry, &cp, ResetKind::Hard).await.unwrap();
        assert_eq!(status, "Accepted");
    }

    #[tokio::test]
    async fn get_configuration_maps_keys() {
        let (registry, cp, _) = answering_station(json!({
            "configurationKey": [
                {"key": "HeartbeatInterval", "readonly": false, "value": "300"}
            ],
            "unknownKey": ["Foo"]
        }));

        let result = get_configuration(&registry, &cp, None).await.unwrap();
        assert_eq!(
            result.configuration_key,
            vec![KeyValue {
                key: "HeartbeatInterval".into(),
                readonly: false,
                value: Some("300".into()),
            }]
        );
        assert_eq!(result.unknown_key, vec!["Foo".to_string()]);
    }

    #[tokio::test]
    async fn malformed_reply_is_invalid_response() {
        let (registry, cp, _) = answering_station(json!({"unexpected": true}));
        let err = remote_stop_transaction(&registry, &cp, 5).await.unwrap_err();
        assert!(matches!(err, CommandError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn trigger_message_registers_follow_up() {
        let (registry, cp, follow_ups) = answering_station(json!({"status": "Accepted"}));
        let status = trigger_message(&registry, &cp, TriggerType::StatusNotification, Some(1))
            .await
            .unwrap();

        assert_eq!(status, "Accepted");
        assert!(follow_ups
            .consume("CP1", "StatusNotification", Some(1))
            .is_some());
    }
}
