//! Infrastructure layer - external concerns

pub mod database;
pub mod storage;

pub use database::{init_database, SeaOrmRepositoryProvider};
pub use storage::{InMemoryAccountService, InMemoryPendingCallStore, InMemoryRepositoryProvider};
