//! Inbound (station → central system) action table

use std::str::FromStr;

use crate::application::commands::OutboundAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundAction {
    BootNotification,
    Heartbeat,
    StatusNotification,
    Authorize,
    StartTransaction,
    StopTransaction,
    MeterValues,
    DiagnosticsStatusNotification,
    FirmwareStatusNotification,
    DataTransfer,
}

impl InboundAction {
    pub const ALL: [InboundAction; 10] = [
        Self::BootNotification,
        Self::Heartbeat,
        Self::StatusNotification,
        Self::Authorize,
        Self::StartTransaction,
        Self::StopTransaction,
        Self::MeterValues,
        Self::DiagnosticsStatusNotification,
        Self::FirmwareStatusNotification,
        Self::DataTransfer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BootNotification => "BootNotification",
            Self::Heartbeat => "Heartbeat",
            Self::StatusNotification => "StatusNotification",
            Self::Authorize => "Authorize",
            Self::StartTransaction => "StartTransaction",
            Self::StopTransaction => "StopTransaction",
            Self::MeterValues => "MeterValues",
            Self::DiagnosticsStatusNotification => "DiagnosticsStatusNotification",
            Self::FirmwareStatusNotification => "FirmwareStatusNotification",
            Self::DataTransfer => "DataTransfer",
        }
    }
}

impl FromStr for InboundAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(action) = Self::ALL.iter().copied().find(|a| a.as_str() == s) {
            return Ok(action);
        }
        if s.parse::<OutboundAction>().is_ok() {
            Err(UnknownAction::WrongDirection)
        } else {
            Err(UnknownAction::NotImplemented)
        }
    }
}

/// Why an inbound action name was not dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownAction {
    /// A central-system action sent by a station
    WrongDirection,
    NotImplemented,
}
