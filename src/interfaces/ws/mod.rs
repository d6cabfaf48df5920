//! WebSocket interfaces
//!
//! - `handshake`: upgrade admission (identity, subprotocol, per-IP quota)
//! - `ocpp_server`: listener and per-connection read/write loop

pub mod handshake;
pub mod ocpp_server;

pub use handshake::OCPP_SUBPROTOCOL;
pub use ocpp_server::OcppServer;
