//! Interfaces layer - transports facing the charging stations

pub mod ws;
