//! In-memory repositories for development, tests and embedding

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;

use crate::domain::{
    ChargerIdentity, ChargerStatus, ChargerStatusRepository, DomainResult, MeterValue,
    MeterValueRepository, PendingCall, PendingCallStatus, PendingCallStore, RepositoryProvider,
    Transaction, TransactionRepository,
};

// ── Charger status ─────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryChargerStatusRepository {
    statuses: DashMap<String, ChargerStatus>,
}

#[async_trait]
impl ChargerStatusRepository for InMemoryChargerStatusRepository {
    async fn get(&self, identity: &ChargerIdentity) -> DomainResult<Option<ChargerStatus>> {
        Ok(self.statuses.get(&identity.key()).map(|s| s.clone()))
    }

    async fn upsert(&self, status: ChargerStatus) -> DomainResult<()> {
        self.statuses.insert(status.identity.key(), status);
        Ok(())
    }

    async fn list_for_station(&self, serial_number: &str) -> DomainResult<Vec<ChargerStatus>> {
        let mut statuses: Vec<ChargerStatus> = self
            .statuses
            .iter()
            .filter(|s| s.identity.serial_number == serial_number)
            .map(|s| s.clone())
            .collect();
        statuses.sort_by_key(|s| s.identity.connector_id);
        Ok(statuses)
    }
}

// ── Transactions ───────────────────────────────────────────────

pub struct InMemoryTransactionRepository {
    transactions: DashMap<i32, Transaction>,
    counter: AtomicI32,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Self {
        Self {
            transactions: DashMap::new(),
            counter: AtomicI32::new(1),
        }
    }
}

impl Default for InMemoryTransactionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn insert(&self, transaction: Transaction) -> DomainResult<()> {
        // Keep generated ids ahead of ids taken from stations (placeholders)
        self.counter.fetch_max(transaction.id + 1, Ordering::SeqCst);
        self.transactions.insert(transaction.id, transaction);
        Ok(())
    }

    async fn update(&self, transaction: Transaction) -> DomainResult<()> {
        self.transactions.insert(transaction.id, transaction);
        Ok(())
    }

    async fn find_by_id(&self, id: i32) -> DomainResult<Option<Transaction>> {
        Ok(self.transactions.get(&id).map(|t| t.clone()))
    }

    async fn find_active_for_connector(
        &self,
        charger: &ChargerIdentity,
        connector_id: u32,
    ) -> DomainResult<Option<Transaction>> {
        Ok(self
            .transactions
            .iter()
            .find(|t| {
                t.is_active()
                    && t.charger.serial_number == charger.serial_number
                    && t.connector_id == connector_id
            })
            .map(|t| t.clone()))
    }

    async fn find_active_by_credential(&self, id_tag: &str) -> DomainResult<Vec<Transaction>> {
        Ok(self
            .transactions
            .iter()
            .filter(|t| t.is_active() && t.credential_ref.as_deref() == Some(id_tag))
            .map(|t| t.clone())
            .collect())
    }

    async fn find_active(&self) -> DomainResult<Vec<Transaction>> {
        Ok(self
            .transactions
            .iter()
            .filter(|t| t.is_active())
            .map(|t| t.clone())
            .collect())
    }

    async fn next_id(&self) -> DomainResult<i32> {
        Ok(self.counter.fetch_add(1, Ordering::SeqCst))
    }
}

// ── Meter values ───────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryMeterValueRepository {
    values: DashMap<Option<i32>, Vec<MeterValue>>,
}

#[async_trait]
impl MeterValueRepository for InMemoryMeterValueRepository {
    async fn append(&self, values: Vec<MeterValue>) -> DomainResult<()> {
        for value in values {
            self.values.entry(value.transaction_id).or_default().push(value);
        }
        Ok(())
    }

    async fn list_for_transaction(&self, transaction_id: i32) -> DomainResult<Vec<MeterValue>> {
        let mut values = self
            .values
            .get(&Some(transaction_id))
            .map(|v| v.clone())
            .unwrap_or_default();
        values.sort_by_key(|v| v.timestamp);
        Ok(values)
    }
}

// ── Pending calls ──────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryPendingCallStore {
    calls: DashMap<String, PendingCall>,
}

impl InMemoryPendingCallStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingCallStore for InMemoryPendingCallStore {
    async fn upsert(&self, call: &PendingCall) -> DomainResult<()> {
        self.calls.insert(call.message_id.clone(), call.clone());
        Ok(())
    }

    async fn get(&self, message_id: &str) -> DomainResult<Option<PendingCall>> {
        Ok(self.calls.get(message_id).map(|c| c.clone()))
    }

    async fn delete(&self, message_id: &str) -> DomainResult<()> {
        self.calls.remove(message_id);
        Ok(())
    }

    async fn list_pending(&self) -> DomainResult<Vec<PendingCall>> {
        Ok(self
            .calls
            .iter()
            .filter(|c| !c.is_terminal())
            .map(|c| c.clone())
            .collect())
    }

    async fn finish_if_pending(
        &self,
        message_id: &str,
        status: PendingCallStatus,
        result: Option<Value>,
        error: Option<Value>,
        at: DateTime<Utc>,
    ) -> DomainResult<Option<PendingCall>> {
        let Some(mut call) = self.calls.get_mut(message_id) else {
            return Ok(None);
        };
        if call.finish(status, result, error, at) {
            Ok(Some(call.clone()))
        } else {
            Ok(None)
        }
    }
}

// ── Provider ───────────────────────────────────────────────────

pub struct InMemoryRepositoryProvider {
    charger_statuses: Arc<InMemoryChargerStatusRepository>,
    transactions: Arc<InMemoryTransactionRepository>,
    meter_values: Arc<InMemoryMeterValueRepository>,
    pending_calls: Arc<InMemoryPendingCallStore>,
}

impl InMemoryRepositoryProvider {
    pub fn new() -> Self {
        Self {
            charger_statuses: Arc::new(InMemoryChargerStatusRepository::default()),
            transactions: Arc::new(InMemoryTransactionRepository::new()),
            meter_values: Arc::new(InMemoryMeterValueRepository::default()),
            pending_calls: Arc::new(InMemoryPendingCallStore::new()),
        }
    }
}

impl Default for InMemoryRepositoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl RepositoryProvider for InMemoryRepositoryProvider {
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
