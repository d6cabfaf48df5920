//! Transaction domain entity

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::identity::ChargerIdentity;
use crate::shared::errors::DomainError;

/// Transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Active,
    /// Terminal
    Stopped,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Stopped => "Stopped",
        }
    }

}

impl FromStr for TransactionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(Self::Active),
            "Stopped" => Ok(Self::Stopped),
            other => Err(DomainError::Validation(format!("unknown transaction status {}", other))),
        }
    }
}

/// Stop reason recorded when a newer start replaces an Active transaction.
pub const SUPERSEDED_REASON: &str = "Superseded";

/// Charging transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i32,
    /// Aggregate identity of the station
    pub charger: ChargerIdentity,
    pub connector_id: u32,
    /// idTag presented at start
    pub credential_ref: Option<String>,
    /// Meter value at start (Wh)
    pub start_meter: Option<i64>,
    /// `start_meter` was taken from the earliest energy sample
    pub start_meter_inferred: bool,
    pub start_timestamp: Option<DateTime<Utc>>,
    /// Meter value at stop (Wh)
    pub stop_meter: Option<i64>,
    pub stop_timestamp: Option<DateTime<Utc>>,
    pub stop_reason: Option<String>,
    pub status: TransactionStatus,
    /// Synthesized from a stop that matched no known transaction
    pub placeholder: bool,
}

impl Transaction {
    pub fn start(
        id: i32,
        charger: ChargerIdentity,
        connector_id: u32,
        credential_ref: Option<String>,
        start_meter: Option<i64>,
        start_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            charger,
            connector_id,
            credential_ref,
            start_meter,
            start_meter_inferred: false,
            start_timestamp: Some(start_timestamp),
            stop_meter: None,
            stop_timestamp: None,
            stop_reason: None,
            status: TransactionStatus::Active,
            placeholder: false,
        }
    }

    /// Stand-in for a stop whose start was never seen.
    pub fn placeholder(id: i32, charger: ChargerIdentity, connector_id: u32) -> Self {
        Self {
            id,
            charger,
            connector_id,
            credential_ref: None,
            start_meter: None,
            start_meter_inferred: false,
            start_timestamp: None,
            stop_meter: None,
            stop_timestamp: None,
            stop_reason: None,
            status: TransactionStatus::Active,
            placeholder: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }

    /// The identity this transaction's session-log stream and
    /// broadcasts are addressed to.
    pub fn connector_identity(&self) -> ChargerIdentity {
        self.charger.with_connector(self.connector_id)
    }

    /// Returns `false` when already stopped.
    pub fn stop(
        &mut self,
        stop_meter: Option<i64>,
        stop_timestamp: DateTime<Utc>,
        reason: Option<String>,
    ) -> bool {
        if !self.is_active() {
            return false;
        }
        if stop_meter.is_some() {
            self.stop_meter = stop_meter;
        }
        self.stop_timestamp = Some(stop_timestamp);
        self.stop_reason = reason;
        self.status = TransactionStatus::Stopped;
        true
    }

    /// Energy delivered so far (Wh), if both ends are known.
    pub fn energy_wh(&self, latest_meter: Option<i64>) -> Option<i64> {
        let end = self.stop_meter.or(latest_meter)?;
        end.checked_sub(self.start_meter?)
    }
}

/// One sampled value. `transaction_id` is `None` for samples reported
/// outside any transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterValue {
    pub transaction_id: Option<i32>,
    pub charger: ChargerIdentity,
    pub connector_id: u32,
    pub timestamp: DateTime<Utc>,
    pub measurand: String,
    /// Raw value string as reported
    pub value: String,
    pub context: Option<String>,
    pub unit: Option<String>,
}

pub const ENERGY_MEASURAND: &str = "Energy.Active.Import.Register";
pub const CONTEXT_TRANSACTION_BEGIN: &str = "Transaction.Begin";
pub const CONTEXT_TRANSACTION_END: &str = "Transaction.End";

impl MeterValue {
    pub fn is_energy_register(&self) -> bool {
        self.measurand == ENERGY_MEASURAND
    }

    /// Energy register reading normalized to Wh.
    pub fn energy_wh(&self) -> Option<i64> {
        if !self.is_energy_register() {
            return None;
        }
        let value: f64 = self.value.trim().parse().ok()?;
        let wh = match self.unit.as_deref() {
            Some(unit) if unit.eq_ignore_ascii_case("kWh") => value * 1000.0,
            _ => value,
        };
        Some(wh.round() as i64)
    }

    pub fn is_begin_sample(&self) -> bool {
        self.context.as_deref() == Some(CONTEXT_TRANSACTION_BEGIN)
    }

    pub fn is_end_sample(&self) -> bool {
        self.context.as_deref() == Some(CONTEXT_TRANSACTION_END)
    }
}
