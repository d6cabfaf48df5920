//! SeaORM implementation of RepositoryProvider

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::domain::charger_status::ChargerStatusRepository;
use crate::domain::pending_call::PendingCallStore;
use crate::domain::repositories::RepositoryProvider;
use crate::domain::transaction::{MeterValueRepository, TransactionRepository};

use super::charger_status_repository::SeaOrmChargerStatusRepository;
use super::pending_call_repository::SeaOrmPendingCallStore;
use super::transaction_repository::{SeaOrmMeterValueRepository, SeaOrmTransactionRepository};

/// Unified repository provider backed by SeaORM.
///
/// Holds one connection pool and exposes per-aggregate repository accessors.
///
/// ```ignore
/// let repos = SeaOrmRepositoryProvider::new(db.clone());
/// let tx = repos.transactions().find_active_for_connector(&cp, 1).await?;
/// ```
pub struct SeaOrmRepositoryProvider {
    charger_statuses: Arc<SeaOrmChargerStatusRepository>,
    transactions: Arc<SeaOrmTransactionRepository>,
    meter_values: Arc<SeaOrmMeterValueRepository>,
    pending_calls: Arc<SeaOrmPendingCallStore>,
}

impl SeaOrmRepositoryProvider {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            charger_statuses: Arc::new(SeaOrmChargerStatusRepository::new(db.clone())),
            transactions: Arc::new(SeaOrmTransactionRepository::new(db.clone())),
            meter_values: Arc::new(SeaOrmMeterValueRepository::new(db.clone())),
            pending_calls: Arc::new(SeaOrmPendingCallStore::new(db)),
        }
    }
}

impl RepositoryProvider for SeaOrmRepositoryProvider {
    fn charger_statuses(&self) -> Arc<dyn ChargerStatusRepository> {
        self.charger_statuses.clone()
    }

    fn transactions(&self) -> Arc<dyn TransactionRepository> {
        self.transactions.clone()
    }

    fn meter_values(&self) -> Arc<dyn MeterValueRepository> {
        self.meter_values.clone()
    }

    fn pending_calls(&self) -> Arc<dyn PendingCallStore> {
        self.pending_calls.clone()
    }
}
