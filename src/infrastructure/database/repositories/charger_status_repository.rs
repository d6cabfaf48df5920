//! SeaORM implementation of ChargerStatusRepository

use async_trait::async_trait;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use serde_json::Value;
use tracing::debug;

use crate::domain::charger_status::{AvailabilityState, ChargerStatus, ChargerStatusRepository};
use crate::domain::{ChargerIdentity, DomainResult};
use crate::infrastructure::database::entities::charger_status;

pub struct SeaOrmChargerStatusRepository {
    db: DatabaseConnection,
}

impl SeaOrmChargerStatusRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn model_to_domain(m: charger_status::Model) -> ChargerStatus {
    let vendor_info = match m.vendor_info {
        Value::Object(map) => map,
        _ => Default::default(),
    };
    ChargerStatus {
        identity: ChargerIdentity::new(m.serial_number, m.connector_id.max(0) as u32),
        last_status: m.last_status,
        last_error_code: m.last_error_code,
        vendor_info,
        timestamp: m.timestamp,
        availability: m.availability.parse::<AvailabilityState>().unwrap_or_default(),
    }
}

#[async_trait]
impl ChargerStatusRepository for SeaOrmChargerStatusRepository {
    async fn get(&self, identity: &ChargerIdentity) -> DomainResult<Option<ChargerStatus>> {
        let model = charger_status::Entity::find_by_id(identity.key())
            .one(&self.db)
            .await?;
        Ok(model.map(model_to_domain))
    }

    async fn upsert(&self, status: ChargerStatus) -> DomainResult<()> {
        debug!(charger = %status.identity, "Saving charger status");

        let model = charger_status::ActiveModel {
            key: Set(status.identity.key()),
            serial_number: Set(status.identity.serial_number.clone()),
            connector_id: Set(status.identity.connector_id as i32),
            last_status: Set(status.last_status),
            last_error_code: Set(status.last_error_code),
            vendor_info: Set(Value::Object(status.vendor_info)),
            timestamp: Set(status.timestamp),
            availability: Set(status.availability.as_str().to_string()),
        };

        charger_status::Entity::insert(model)
            .on_conflict(
                OnConflict::column(charger_status::Column::Key)
                    .update_columns([
                        charger_status::Column::LastStatus,
                        charger_status::Column::LastErrorCode,
                        charger_status::Column::VendorInfo,
                        charger_status::Column::Timestamp,
                        charger_status::Column::Availability,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn list_for_station(&self, serial_number: &str) -> DomainResult<Vec<ChargerStatus>> {
        let models = charger_status::Entity::find()
            .filter(charger_status::Column::SerialNumber.eq(serial_number))
            .order_by_asc(charger_status::Column::ConnectorId)
            .all(&self.db)
            .await?;
        Ok(models.into_iter().map(model_to_domain).collect())
    }
}
