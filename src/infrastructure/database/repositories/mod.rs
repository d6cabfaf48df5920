//! Database repository implementations
//!
//! Per-aggregate SeaORM repositories + unified RepositoryProvider.

pub mod charger_status_repository;
pub mod pending_call_repository;
pub mod repository_provider;
pub mod transaction_repository;

pub use repository_provider::SeaOrmRepositoryProvider;
