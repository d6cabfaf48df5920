//! # OCPP Central System
//!
//! OCPP 1.6 protocol engine for managing EV charging stations over
//! WebSocket (OCPP-J).
//!
//! ## Architecture
//!
//! The project follows Clean Architecture principles:
//!
//! - **domain**: Core entities (identity, status, transactions, pending
//!   calls) and the repository traits
//! - **application**: Session store, protocol dispatcher, pending-call
//!   registry, transaction state machine and session log
//! - **infrastructure**: In-memory and SeaORM storage
//! - **interfaces**: WebSocket server and upgrade admission
//! - **server**: Process bootstrap and graceful shutdown

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
pub mod server;
pub mod shared;

pub use config::{default_config_path, AppConfig, ConfigError};

pub use application::{
    create_event_bus, CentralSystem, EngineSettings, EventBus, SharedCentralSystem,
    SharedEventBus,
};

// Re-export storage types for easy access
pub use infrastructure::{
    init_database, InMemoryAccountService, InMemoryRepositoryProvider, SeaOrmRepositoryProvider,
};
