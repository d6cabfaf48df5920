pub mod broadcast;
pub mod status;
pub mod transactions;

pub use broadcast::ConsumptionBroadcaster;
pub use status::{StatusReport, StatusService};
pub use transactions::{
    Authorization, Sample, StartOutcome, StartRequest, StopOutcome, StopRequest,
    TransactionPolicy, TransactionService,
};
