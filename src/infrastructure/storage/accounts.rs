//! Built-in account resolver backed by a seed list

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::domain::{Account, AccountService, ChargerIdentity};

/// Accounts held in memory, typically seeded from configuration.
#[derive(Default)]
pub struct InMemoryAccountService {
    accounts: DashMap<String, Account>,
}

impl InMemoryAccountService {
    pub fn new(accounts: impl IntoIterator<Item = Account>) -> Self {
        let service = Self::default();
        for account in accounts {
            service.insert(account);
        }
        service
    }

    pub fn insert(&self, account: Account) {
        self.accounts.insert(account.id_tag.clone(), account);
    }
}

#[async_trait]
impl AccountService for InMemoryAccountService {
    async fn resolve_account(&self, id_tag: &str) -> Option<Account> {
        self.accounts.get(id_tag).map(|a| a.clone())
    }

    async fn is_authorized(&self, account: &Account, charger: &ChargerIdentity) -> bool {
        if account.effective_status(Utc::now()) != crate::domain::AccountStatus::Accepted {
            return false;
        }
        match &account.allowed_chargers {
            Some(allowed) => allowed.iter().any(|s| s == &charger.serial_number),
            None => true,
        }
    }
}
