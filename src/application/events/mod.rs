//! Application events (pub/sub)

pub mod event_bus;

pub use event_bus::{
    create_event_bus, topics, EventBus, EventMessage, EventSubscriber, SharedEventBus,
};
