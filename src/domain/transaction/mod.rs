//! Transaction aggregate

pub mod model;
pub mod repository;

pub use model::{MeterValue, Transaction, TransactionStatus};
pub use repository::{MeterValueRepository, TransactionRepository};
