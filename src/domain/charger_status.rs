//! Charger status aggregate

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::identity::ChargerIdentity;
use crate::shared::errors::{DomainError, DomainResult};

/// Coarse availability derived from the last recognized status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AvailabilityState {
    Operative,
    Inoperative,
    #[default]
    Unknown,
}

impl AvailabilityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operative => "Operative",
            Self::Inoperative => "Inoperative",
            Self::Unknown => "Unknown",
        }
    }

}

impl FromStr for AvailabilityState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Operative" => Ok(Self::Operative),
            "Inoperative" => Ok(Self::Inoperative),
            "Unknown" => Ok(Self::Unknown),
            other => Err(DomainError::Validation(format!("unknown availability {}", other))),
        }
    }
}

impl fmt::Display for AvailabilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status vocabulary after trimming and lowercasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizedStatus {
    Available,
    Preparing,
    Charging,
    SuspendedEv,
    SuspendedEvse,
    Finishing,
    Faulted,
    Unavailable,
    Reserved,
    Occupied,
    OutOfService,
}

impl NormalizedStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        let status = match raw.trim().to_lowercase().as_str() {
            "available" => Self::Available,
            "preparing" => Self::Preparing,
            "charging" => Self::Charging,
            "suspendedev" => Self::SuspendedEv,
            "suspendedevse" => Self::SuspendedEvse,
            "finishing" => Self::Finishing,
            "faulted" => Self::Faulted,
            "unavailable" => Self::Unavailable,
            "reserved" => Self::Reserved,
            "occupied" => Self::Occupied,
            "outofservice" => Self::OutOfService,
            _ => return None,
        };
        Some(status)
    }

    /// `None` means the status does not move availability either way.
    pub fn availability(&self) -> Option<AvailabilityState> {
        match self {
            Self::Available
            | Self::Preparing
            | Self::Charging
            | Self::SuspendedEv
            | Self::SuspendedEvse
            | Self::Finishing
            | Self::Reserved => Some(AvailabilityState::Operative),
            Self::Unavailable | Self::Faulted => Some(AvailabilityState::Inoperative),
            Self::Occupied | Self::OutOfService => None,
        }
    }
}

/// Next availability state for a reported raw status.
pub fn derive_availability(current: AvailabilityState, raw_status: &str) -> AvailabilityState {
    NormalizedStatus::parse(raw_status)
        .and_then(|s| s.availability())
        .unwrap_or(current)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargerStatus {
    pub identity: ChargerIdentity,
    /// Raw status string exactly as reported
    pub last_status: Option<String>,
    pub last_error_code: Option<String>,
    /// Free-form station details (boot info, vendor error codes, diagnostics)
    pub vendor_info: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub availability: AvailabilityState,
}

impl ChargerStatus {
    pub fn new(identity: ChargerIdentity) -> Self {
        Self {
            identity,
            last_status: None,
            last_error_code: None,
            vendor_info: Map::new(),
            timestamp: Utc::now(),
            availability: AvailabilityState::Unknown,
        }
    }

    /// Record a status report. Availability only moves on recognized values.
    pub fn apply_status(
        &mut self,
        status: &str,
        error_code: Option<&str>,
        timestamp: DateTime<Utc>,
    ) {
        self.availability = derive_availability(self.availability, status);
        self.last_status = Some(status.to_string());
        self.last_error_code = error_code.map(str::to_string);
        self.timestamp = timestamp;
    }

    /// Merge non-null fields into `vendor_info`.
    pub fn merge_vendor_info(&mut self, fields: impl IntoIterator<Item = (String, Value)>) {
        for (key, value) in fields {
            if !value.is_null() {
                self.vendor_info.insert(key, value);
            }
        }
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.timestamp = at;
    }
}

#[async_trait]
pub trait ChargerStatusRepository: Send + Sync {
    async fn get(&self, identity: &ChargerIdentity) -> DomainResult<Option<ChargerStatus>>;
    async fn upsert(&self, status: ChargerStatus) -> DomainResult<()>;
    /// Every stored identity of one station, aggregate first.
    async fn list_for_station(&self, serial_number: &str) -> DomainResult<Vec<ChargerStatus>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn stored_availability_parses() {
        for state in [
            AvailabilityState::Operative,
            AvailabilityState::Inoperative,
            AvailabilityState::Unknown,
        ] {
            assert_eq!(state.as_str().parse::<AvailabilityState>().unwrap(), state);
        }
        assert!("Broken".parse::<AvailabilityState>().is_err());
    }

    #[rstest]
    #[case("Available", AvailabilityState::Operative)]
    #[case("  CHARGING ", AvailabilityState::Operative)]
    #[case("SuspendedEVSE", AvailabilityState::Operative)]
    #[case("Reserved", AvailabilityState::Operative)]
    #[case("Faulted", AvailabilityState::Inoperative)]
    #[case("unavailable", AvailabilityState::Inoperative)]
    fn recognized_status_sets_availability(
        #[case] raw: &str,
        #[case] expected: AvailabilityState,
    ) {
        assert_eq!(derive_availability(AvailabilityState::Unknown, raw), expected);
    }

    #[rstest]
    #[case("Occupied")]
    #[case("OutOfService")]
    #[case("Exploded")]
    #[case("")]
    fn other_status_keeps_availability(#[case] raw: &str) {
        assert_eq!(
            derive_availability(AvailabilityState::Inoperative, raw),
            AvailabilityState::Inoperative
        );
    }

    #[test]
    fn unrecognized_status_is_still_stored_raw() {
        let mut status = ChargerStatus::new(ChargerIdentity::aggregate("CP1"));
        status.apply_status("Available", Some("NoError"), Utc::now());
        status.apply_status("Weird-Vendor-State", None, Utc::now());

        assert_eq!(status.availability, AvailabilityState::Operative);
        assert_eq!(status.last_status.as_deref(), Some("Weird-Vendor-State"));
        assert_eq!(status.last_error_code, None);
    }

    #[test]
    fn vendor_info_skips_nulls() {
        let mut status = ChargerStatus::new(ChargerIdentity::aggregate("CP1"));
        status.merge_vendor_info([
            ("vendor".to_string(), Value::from("ACME")),
            ("firmware".to_string(), Value::Null),
        ]);
        assert_eq!(status.vendor_info.len(), 1);
        assert_eq!(status.vendor_info["vendor"], "ACME");
    }
}
