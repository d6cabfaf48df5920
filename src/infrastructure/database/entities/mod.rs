//! Database entities module

pub mod charger_status;
pub mod meter_value;
pub mod pending_call;
pub mod transaction;

pub use charger_status::Entity as ChargerStatus;
pub use meter_value::Entity as MeterValue;
pub use pending_call::Entity as PendingCall;
pub use transaction::Entity as Transaction;
