//! Storage implementations that need no external service

pub mod accounts;
pub mod memory;

pub use accounts::InMemoryAccountService;
pub use memory::{InMemoryPendingCallStore, InMemoryRepositoryProvider};
