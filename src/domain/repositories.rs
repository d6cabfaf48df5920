//! Row-store abstraction consumed by the engine

use std::sync::Arc;

use super::charger_status::ChargerStatusRepository;
use super::pending_call::PendingCallStore;
use super::transaction::{MeterValueRepository, TransactionRepository};

/// One handle for every store the engine persists to.
pub trait RepositoryProvider: Send + Sync {
    fn charger_statuses(&self) -> Arc<dyn ChargerStatusRepository>;
    fn transactions(&self) -> Arc<dyn TransactionRepository>;
    fn meter_values(&self) -> Arc<dyn MeterValueRepository>;
    fn pending_calls(&self) -> Arc<dyn PendingCallStore>;
}
