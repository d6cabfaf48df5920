//! Outbound (central system → station) action catalog and timeouts

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Every OCPP 1.6 action the central system may initiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboundAction {
    RemoteStartTransaction,
    RemoteStopTransaction,
    Reset,
    ChangeAvailability,
    ChangeConfiguration,
    DataTransfer,
    GetConfiguration,
    TriggerMessage,
    ReserveNow,
    CancelReservation,
    ClearCache,
    SendLocalList,
    GetLocalListVersion,
    UnlockConnector,
    UpdateFirmware,
    GetDiagnostics,
    SetChargingProfile,
    ClearChargingProfile,
    GetCompositeSchedule,
}

impl OutboundAction {
    pub const ALL: [OutboundAction; 19] = [
        Self::RemoteStartTransaction,
        Self::RemoteStopTransaction,
        Self::Reset,
        Self::ChangeAvailability,
        Self::ChangeConfiguration,
        Self::DataTransfer,
        Self::GetConfiguration,
        Self::TriggerMessage,
        Self::ReserveNow,
        Self::CancelReservation,
        Self::ClearCache,
        Self::SendLocalList,
        Self::GetLocalListVersion,
        Self::UnlockConnector,
        Self::UpdateFirmware,
        Self::GetDiagnostics,
        Self::SetChargingProfile,
        Self::ClearChargingProfile,
        Self::GetCompositeSchedule,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RemoteStartTransaction => "RemoteStartTransaction",
            Self::RemoteStopTransaction => "RemoteStopTransaction",
            Self::Reset => "Reset",
            Self::ChangeAvailability => "ChangeAvailability",
            Self::ChangeConfiguration => "ChangeConfiguration",
            Self::DataTransfer => "DataTransfer",
            Self::GetConfiguration => "GetConfiguration",
            Self::TriggerMessage => "TriggerMessage",
            Self::ReserveNow => "ReserveNow",
            Self::CancelReservation => "CancelReservation",
            Self::ClearCache => "ClearCache",
            Self::SendLocalList => "SendLocalList",
            Self::GetLocalListVersion => "GetLocalListVersion",
            Self::UnlockConnector => "UnlockConnector",
            Self::UpdateFirmware => "UpdateFirmware",
            Self::GetDiagnostics => "GetDiagnostics",
            Self::SetChargingProfile => "SetChargingProfile",
            Self::ClearChargingProfile => "ClearChargingProfile",
            Self::GetCompositeSchedule => "GetCompositeSchedule",
        }
    }
}

impl fmt::Display for OutboundAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboundAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("Unknown outbound action: {}", s))
    }
}

/// Reply deadline per action, with a fallback default.
#[derive(Debug, Clone)]
pub struct CommandTimeouts {
    default: Duration,
    per_action: HashMap<String, Duration>,
}

impl CommandTimeouts {
    pub fn new(default: Duration) -> Self {
        Self {
            default,
            per_action: HashMap::new(),
        }
    }

    pub fn with(mut self, action: impl Into<String>, timeout: Duration) -> Self {
        self.per_action.insert(action.into(), timeout);
        self
    }

    pub fn for_action(&self, action: &str) -> Duration {
        self.per_action.get(action).copied().unwrap_or(self.default)
    }
}

impl Default for CommandTimeouts {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
            .with(OutboundAction::GetConfiguration.as_str(), Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_action_parses_back() {
        for action in OutboundAction::ALL {
            assert_eq!(action.as_str().parse::<OutboundAction>(), Ok(action));
        }
        assert!("Heartbeat".parse::<OutboundAction>().is_err());
    }

    #[test]
    fn default_timeouts() {
        let timeouts = CommandTimeouts::default();
        assert_eq!(timeouts.for_action("GetConfiguration"), Duration::from_secs(5));
        assert_eq!(timeouts.for_action("Reset"), Duration::from_secs(30));
    }
}
