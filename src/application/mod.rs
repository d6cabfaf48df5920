pub mod central_system;
pub mod charging;
pub mod commands;
pub mod events;
pub mod handlers;
pub mod session;

// Re-export key types for convenience
pub use central_system::{CentralSystem, EngineSettings, SharedCentralSystem};
pub use charging::{StatusService, TransactionPolicy, TransactionService};
pub use commands::{
    CommandError, CommandTimeouts, OutboundAction, PendingCallRegistry, Resolution,
    SharedPendingCallRegistry, TriggerFollowUps,
};
pub use events::{create_event_bus, EventBus, EventMessage, EventSubscriber, SharedEventBus};
pub use handlers::OcppHandlerV16;
pub use session::{SessionLog, SessionRegistry, SharedSessionRegistry};
