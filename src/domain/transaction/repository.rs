//! Transaction and meter-value repository interfaces

use async_trait::async_trait;

use super::model::{MeterValue, Transaction};
use crate::domain::identity::ChargerIdentity;
use crate::shared::errors::DomainResult;

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn insert(&self, transaction: Transaction) -> DomainResult<()>;
    async fn update(&self, transaction: Transaction) -> DomainResult<()>;
    async fn find_by_id(&self, id: i32) -> DomainResult<Option<Transaction>>;
    async fn find_active_for_connector(
        &self,
        charger: &ChargerIdentity,
        connector_id: u32,
    ) -> DomainResult<Option<Transaction>>;
    /// Active transactions started with `id_tag`, on any station.
    async fn find_active_by_credential(&self, id_tag: &str) -> DomainResult<Vec<Transaction>>;
    async fn find_active(&self) -> DomainResult<Vec<Transaction>>;
    async fn next_id(&self) -> DomainResult<i32>;
}

#[async_trait]
pub trait MeterValueRepository: Send + Sync {
    async fn append(&self, values: Vec<MeterValue>) -> DomainResult<()>;
    /// Samples ordered by reported timestamp, not arrival.
    async fn list_for_transaction(&self, transaction_id: i32) -> DomainResult<Vec<MeterValue>>;
}
