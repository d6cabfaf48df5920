//! SeaORM implementation of TransactionRepository and MeterValueRepository

use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::transaction::{
    MeterValue, MeterValueRepository, Transaction, TransactionRepository, TransactionStatus,
};
use crate::domain::{ChargerIdentity, DomainError, DomainResult};
use crate::infrastructure::database::entities::{meter_value, transaction};

pub struct SeaOrmTransactionRepository {
    db: DatabaseConnection,
    /// Next id to hand out, loaded from the table on first use
    next: Mutex<Option<i32>>,
}

impl SeaOrmTransactionRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            next: Mutex::new(None),
        }
    }

    async fn max_id(&self) -> DomainResult<i32> {
        let last = transaction::Entity::find()
            .order_by_desc(transaction::Column::Id)
            .one(&self.db)
            .await?;
        Ok(last.map(|t| t.id).unwrap_or(0))
    }
}

// ── Conversion helpers ──────────────────────────────────────────

fn model_to_domain(t: transaction::Model) -> DomainResult<Transaction> {
    let status: TransactionStatus = t.status.parse()?;
    Ok(Transaction {
        id: t.id,
        charger: ChargerIdentity::aggregate(t.serial_number),
        connector_id: t.connector_id.max(0) as u32,
        credential_ref: t.credential_ref,
        start_meter: t.start_meter,
        start_meter_inferred: t.start_meter_inferred,
        start_timestamp: t.start_timestamp,
        stop_meter: t.stop_meter,
        stop_timestamp: t.stop_timestamp,
        stop_reason: t.stop_reason,
        status,
        placeholder: t.placeholder,
    })
}

fn domain_to_active(tx: Transaction) -> transaction::ActiveModel {
    transaction::ActiveModel {
        id: Set(tx.id),
        serial_number: Set(tx.charger.serial_number),
        connector_id: Set(tx.connector_id as i32),
        credential_ref: Set(tx.credential_ref),
        start_meter: Set(tx.start_meter),
        start_meter_inferred: Set(tx.start_meter_inferred),
        start_timestamp: Set(tx.start_timestamp),
        stop_meter: Set(tx.stop_meter),
        stop_timestamp: Set(tx.stop_timestamp),
        stop_reason: Set(tx.stop_reason),
        status: Set(tx.status.as_str().to_string()),
        placeholder: Set(tx.placeholder),
    }
}

fn collect(models: Vec<transaction::Model>) -> DomainResult<Vec<Transaction>> {
    models.into_iter().map(model_to_domain).collect()
}

// ── TransactionRepository impl ──────────────────────────────────

#[async_trait]
impl TransactionRepository for SeaOrmTransactionRepository {
    async fn insert(&self, tx: Transaction) -> DomainResult<()> {
        debug!(transaction_id = tx.id, "Inserting transaction");
        let id = tx.id;
        domain_to_active(tx).insert(&self.db).await?;

        // Station-supplied ids (placeholders) push the sequence forward
        let mut next = self.next.lock().await;
        if let Some(n) = next.as_mut() {
            *n = (*n).max(id + 1);
        }
        Ok(())
    }

    async fn update(&self, tx: Transaction) -> DomainResult<()> {
        debug!(transaction_id = tx.id, "Updating transaction");

        let exists = transaction::Entity::find_by_id(tx.id)
            .one(&self.db)
            .await?
            .is_some();
        if !exists {
            return Err(DomainError::NotFound {
                entity: "Transaction",
                field: "id",
                value: tx.id.to_string(),
            });
        }

        domain_to_active(tx).update(&self.db).await?;
        Ok(())
    }

    async fn find_by_id(&self, id: i32) -> DomainResult<Option<Transaction>> {
        transaction::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(model_to_domain)
            .transpose()
    }

    async fn find_active_for_connector(
        &self,
        charger: &ChargerIdentity,
        connector_id: u32,
    ) -> DomainResult<Option<Transaction>> {
        transaction::Entity::find()
            .filter(transaction::Column::SerialNumber.eq(charger.serial_number.as_str()))
            .filter(transaction::Column::ConnectorId.eq(connector_id as i32))
            .filter(transaction::Column::Status.eq(TransactionStatus::Active.as_str()))
            .order_by_desc(transaction::Column::Id)
            .one(&self.db)
            .await?
            .map(model_to_domain)
            .transpose()
    }

    async fn find_active_by_credential(&self, id_tag: &str) -> DomainResult<Vec<Transaction>> {
        let models = transaction::Entity::find()
            .filter(transaction::Column::CredentialRef.eq(id_tag))
            .filter(transaction::Column::Status.eq(TransactionStatus::Active.as_str()))
            .all(&self.db)
            .await?;
        collect(models)
    }

    async fn find_active(&self) -> DomainResult<Vec<Transaction>> {
        let models = transaction::Entity::find()
            .filter(transaction::Column::Status.eq(TransactionStatus::Active.as_str()))
            .order_by_asc(transaction::Column::Id)
            .all(&self.db)
            .await?;
        collect(models)
    }

    async fn next_id(&self) -> DomainResult<i32> {
        let mut next = self.next.lock().await;
        let id = match *next {
            Some(id) => id,
            None => self.max_id().await? + 1,
        };
        *next = Some(id + 1);
        Ok(id)
    }
}

// ── Meter values ────────────────────────────────────────────────

pub struct SeaOrmMeterValueRepository {
    db: DatabaseConnection,
}

impl SeaOrmMeterValueRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MeterValueRepository for SeaOrmMeterValueRepository {
    async fn append(&self, values: Vec<MeterValue>) -> DomainResult<()> {
        if values.is_empty() {
            return Ok(());
        }
        let models = values.into_iter().map(|v| meter_value::ActiveModel {
            transaction_id: Set(v.transaction_id),
            serial_number: Set(v.charger.serial_number),
            connector_id: Set(v.connector_id as i32),
            timestamp: Set(v.timestamp),
            measurand: Set(v.measurand),
            value: Set(v.value),
            context: Set(v.context),
            unit: Set(v.unit),
            ..Default::default()
        });
        meter_value::Entity::insert_many(models).exec(&self.db).await?;
        Ok(())
    }

    async fn list_for_transaction(&self, transaction_id: i32) -> DomainResult<Vec<MeterValue>> {
        let models = meter_value::Entity::find()
            .filter(meter_value::Column::TransactionId.eq(transaction_id))
            .order_by_asc(meter_value::Column::Timestamp)
            .order_by_asc(meter_value::Column::Id)
            .all(&self.db)
            .await?;
        Ok(models
            .into_iter()
            .map(|m| MeterValue {
                transaction_id: m.transaction_id,
                charger: ChargerIdentity::aggregate(m.serial_number),
                connector_id: m.connector_id.max(0) as u32,
                timestamp: m.timestamp,
                measurand: m.measurand,
                value: m.value,
                context: m.context,
                unit: m.unit,
            })
            .collect())
    }
}
