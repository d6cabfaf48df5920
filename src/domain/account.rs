//! Credential accounts
//!
//! Account and billing logic live outside the engine; it only needs to
//! resolve an idTag and ask whether it may charge on a given station.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identity::ChargerIdentity;

/// Credential status as reported back in `idTagInfo` (OCPP 1.6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AccountStatus {
    #[default]
    Accepted,
    Blocked,
    Expired,
    Invalid,
    ConcurrentTx,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "Accepted"),
            Self::Blocked => write!(f, "Blocked"),
            Self::Expired => write!(f, "Expired"),
            Self::Invalid => write!(f, "Invalid"),
            Self::ConcurrentTx => write!(f, "ConcurrentTx"),
        }
    }
}

impl From<&str> for AccountStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "accepted" => Self::Accepted,
            "blocked" => Self::Blocked,
            "expired" => Self::Expired,
            "concurrenttx" => Self::ConcurrentTx,
            _ => Self::Invalid,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id_tag: String,
    pub parent_id_tag: Option<String>,
    pub status: AccountStatus,
    pub expiry_date: Option<DateTime<Utc>>,
    /// Stations this credential may use; `None` means any
    pub allowed_chargers: Option<Vec<String>>,
}

impl Account {
    pub fn new(id_tag: impl Into<String>) -> Self {
        Self {
            id_tag: id_tag.into(),
            parent_id_tag: None,
            status: AccountStatus::Accepted,
            expiry_date: None,
            allowed_chargers: None,
        }
    }

    /// Status after applying expiry.
    pub fn effective_status(&self, now: DateTime<Utc>) -> AccountStatus {
        match self.expiry_date {
            Some(expiry) if expiry <= now && self.status == AccountStatus::Accepted => {
                AccountStatus::Expired
            }
            _ => self.status,
        }
    }
}

#[async_trait]
pub trait AccountService: Send + Sync {
    async fn resolve_account(&self, id_tag: &str) -> Option<Account>;
    async fn is_authorized(&self, account: &Account, charger: &ChargerIdentity) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_account_reports_expired() {
        let mut account = Account::new("TAG");
        account.expiry_date = Some(Utc::now() - chrono::Duration::hours(1));
        assert_eq!(account.effective_status(Utc::now()), AccountStatus::Expired);
    }

    #[test]
    fn blocked_wins_over_expiry() {
        let mut account = Account::new("TAG");
        account.status = AccountStatus::Blocked;
        account.expiry_date = Some(Utc::now() - chrono::Duration::hours(1));
        assert_eq!(account.effective_status(Utc::now()), AccountStatus::Blocked);
    }

    #[test]
    fn unknown_status_string_is_invalid() {
        assert_eq!(AccountStatus::from("Suspended"), AccountStatus::Invalid);
        assert_eq!(AccountStatus::from("BLOCKED"), AccountStatus::Blocked);
    }
}
