pub mod account;
pub mod charger_status;
pub mod identity;
pub mod pending_call;
pub mod ports;
pub mod repositories;
pub mod transaction;

pub use account::{Account, AccountService, AccountStatus};
pub use charger_status::{AvailabilityState, ChargerStatus, ChargerStatusRepository};
pub use identity::{ChargerIdentity, IdentityError};
pub use pending_call::{PendingCall, PendingCallStatus, PendingCallStore};
pub use ports::Publisher;
pub use repositories::RepositoryProvider;
pub use transaction::{
    MeterValue, MeterValueRepository, Transaction, TransactionRepository, TransactionStatus,
};

pub use crate::shared::errors::{DomainError, DomainResult};
