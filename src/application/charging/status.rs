//! Charger status service
//!
//! Applies boot, heartbeat and status notifications to `ChargerStatus`
//! records and publishes status changes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::application::events::topics;
use crate::domain::{ChargerIdentity, ChargerStatus, ChargerStatusRepository, DomainResult, Publisher};

/// A status report as received, before derivation.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub connector_id: u32,
    /// Raw status string
    pub status: String,
    pub error_code: Option<String>,
    pub info: Option<String>,
    pub vendor_id: Option<String>,
    pub vendor_error_code: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

pub struct StatusService {
    repository: Arc<dyn ChargerStatusRepository>,
    publisher: Arc<dyn Publisher>,
}

impl StatusService {
    pub fn new(repository: Arc<dyn ChargerStatusRepository>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            repository,
            publisher,
        }
    }

    pub async fn get(&self, identity: &ChargerIdentity) -> DomainResult<Option<ChargerStatus>> {
        self.repository.get(identity).await
    }

    pub async fn list_for_station(&self, serial_number: &str) -> DomainResult<Vec<ChargerStatus>> {
        self.repository.list_for_station(serial_number).await
    }

    async fn load(&self, identity: &ChargerIdentity) -> DomainResult<ChargerStatus> {
        Ok(self
            .repository
            .get(identity)
            .await?
            .unwrap_or_else(|| ChargerStatus::new(identity.clone())))
    }

    /// Merge fields into the identity's vendor info and refresh its timestamp.
    pub async fn record_details(
        &self,
        identity: &ChargerIdentity,
        fields: Map<String, Value>,
    ) -> DomainResult<()> {
        let mut status = self.load(identity).await?;
        status.merge_vendor_info(fields);
        status.touch(Utc::now());
        self.repository.upsert(status).await
    }

    pub async fn record_heartbeat(&self, identity: &ChargerIdentity) -> DomainResult<()> {
        let mut status = self.load(identity).await?;
        status.touch(Utc::now());
        self.repository.upsert(status).await
    }

    /// Apply a StatusNotification from the connection `reporter`.
    ///
    /// The record for `(serial, report.connector_id)` is updated, then the
    /// same update is mirrored to the reporting connection's own identity
    /// and to the station aggregate, each once.
    pub async fn apply_report(
        &self,
        reporter: &ChargerIdentity,
        report: StatusReport,
    ) -> DomainResult<ChargerStatus> {
        let target = reporter.with_connector(report.connector_id);
        let timestamp = report.timestamp.unwrap_or_else(Utc::now);

        let mut vendor = Map::new();
        vendor.insert("info".into(), json!(report.info));
        vendor.insert("vendorId".into(), json!(report.vendor_id));
        vendor.insert("vendorErrorCode".into(), json!(report.vendor_error_code));

        let mut targets = vec![target.clone()];
        for mirror in [reporter.clone(), reporter.to_aggregate()] {
            if !targets.contains(&mirror) {
                targets.push(mirror);
            }
        }

        let mut updated = None;
        for identity in targets {
            let mut status = self.load(&identity).await?;
            let before = status.availability;
            status.apply_status(&report.status, report.error_code.as_deref(), timestamp);
            status.merge_vendor_info(vendor.clone());

            if before != status.availability {
                info!(
                    charge_point_id = %identity,
                    from = %before,
                    to = %status.availability,
                    "Availability changed"
                );
            } else {
                debug!(charge_point_id = %identity, status = report.status.as_str(), "Status recorded");
            }

            self.publisher.publish(
                &topics::charger_status(&identity),
                json!({
                    "charger": identity.key(),
                    "status": status.last_status,
                    "errorCode": status.last_error_code,
                    "availability": status.availability.as_str(),
                    "timestamp": status.timestamp,
                }),
            );
            self.repository.upsert(status.clone()).await?;
            updated.get_or_insert(status);
        }

        Ok(updated.unwrap_or_else(|| ChargerStatus::new(target)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::EventBus;
    use crate::domain::AvailabilityState;
    use crate::infrastructure::storage::memory::InMemoryChargerStatusRepository;

    fn service() -> StatusService {
        StatusService::new(
            Arc::new(InMemoryChargerStatusRepository::default()),
            Arc::new(EventBus::new()),
        )
    }

    fn report(connector_id: u32, status: &str, error_code: &str) -> StatusReport {
        StatusReport {
            connector_id,
            status: status.into(),
            error_code: Some(error_code.into()),
            info: None,
            vendor_id: None,
            vendor_error_code: None,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn available_then_faulted() {
        let service = service();
        let cp = ChargerIdentity::aggregate("CP1");

        let first = service.apply_report(&cp, report(0, "Available", "NoError")).await.unwrap();
        assert_eq!(first.availability, AvailabilityState::Operative);

        let second = service
            .apply_report(&cp, report(0, "Faulted", "GroundFailure"))
            .await
            .unwrap();
        assert_eq!(second.availability, AvailabilityState::Inoperative);
        assert_eq!(second.last_status.as_deref(), Some("Faulted"));
        assert_eq!(second.last_error_code.as_deref(), Some("GroundFailure"));
    }

    #[tokio::test]
    async fn connector_report_is_mirrored_to_reporting_identity() {
        let service = service();
        let cp = ChargerIdentity::aggregate("CP1");

        service.apply_report(&cp, report(2, "Charging", "NoError")).await.unwrap();

        let connector = service.get(&ChargerIdentity::new("CP1", 2)).await.unwrap().unwrap();
        let aggregate = service.get(&cp).await.unwrap().unwrap();
        assert_eq!(connector.last_status.as_deref(), Some("Charging"));
        assert_eq!(aggregate.last_status.as_deref(), Some("Charging"));
        assert_eq!(service.list_for_station("CP1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn connector_connection_report_reaches_station_aggregate() {
        let service = service();
        let connector = ChargerIdentity::new("CP1", 1);

        service.apply_report(&connector, report(1, "Faulted", "GroundFailure")).await.unwrap();

        let aggregate = service.get(&connector.to_aggregate()).await.unwrap().unwrap();
        assert_eq!(aggregate.last_status.as_deref(), Some("Faulted"));
        assert_eq!(aggregate.last_error_code.as_deref(), Some("GroundFailure"));
        assert_eq!(aggregate.availability, AvailabilityState::Inoperative);
        assert_eq!(service.list_for_station("CP1").await.unwrap().len(), 2);

        // Reporting for a sibling connector touches sibling, reporter and aggregate
        service.apply_report(&connector, report(2, "Charging", "NoError")).await.unwrap();
        assert_eq!(service.list_for_station("CP1").await.unwrap().len(), 3);
        let aggregate = service.get(&connector.to_aggregate()).await.unwrap().unwrap();
        assert_eq!(aggregate.last_status.as_deref(), Some("Charging"));
    }

    #[tokio::test]
    async fn vendor_fields_are_recorded() {
        let service = service();
        let cp = ChargerIdentity::aggregate("CP1");
        let mut r = report(0, "Faulted", "OtherError");
        r.vendor_id = Some("ACME".into());
        r.vendor_error_code = Some("E42".into());

        let status = service.apply_report(&cp, r).await.unwrap();
        assert_eq!(status.vendor_info["vendorId"], "ACME");
        assert_eq!(status.vendor_info["vendorErrorCode"], "E42");
        assert!(!status.vendor_info.contains_key("info"));
    }
}
