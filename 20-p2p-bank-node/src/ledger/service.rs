use std::{collections::HashSet, path::PathBuf};

use parking_lot::RwLock;
use rand::Rng;
use rust_decimal::Decimal;
use tracing::{error, info};

use super::{
    account::{is_valid_account_number, Account, ACCOUNT_NUMBER_RANGE},
    store::LedgerStore,
};
use crate::error::LedgerError;

/// Account rules on top of the [`LedgerStore`].
///
/// Writers hold the exclusive lock across the whole read-check-write-persist
/// sequence, so every mutation observes a consistent pre-state and returns
/// only after the new snapshot is on disk. Pure reads share the lock.
pub struct AccountService {
    store: RwLock<LedgerStore>,
}

impl AccountService {
    pub fn new(store: LedgerStore) -> Self {
        Self {
            store: RwLock::new(store),
        }
    }

    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let store = LedgerStore::open(path)?;
        info!(
            path = %store.path().display(),
            accounts = store.len(),
            "ledger loaded"
        );
        Ok(Self::new(store))
    }

    pub fn create_account(&self, bank_address: &str) -> Result<Account, LedgerError> {
        let mut store = self.store.write();
        let capacity = (ACCOUNT_NUMBER_RANGE.end() - ACCOUNT_NUMBER_RANGE.start() + 1) as usize;
        if store.len() >= capacity {
            return Err(LedgerError::Exhausted);
        }

        let mut rng = rand::thread_rng();
        let number = loop {
            let candidate = rng.gen_range(ACCOUNT_NUMBER_RANGE).to_string();
            if store.find(&candidate).is_none() {
                break candidate;
            }
        };

        let account = Account::new(number, bank_address.to_string());
        store.insert(account.clone());
        persist(&store)?;
        Ok(account)
    }

    /// Returns the new balance.
    pub fn deposit(&self, number: &str, amount: Decimal) -> Result<Decimal, LedgerError> {
        ensure_non_negative(amount)?;

        let mut store = self.store.write();
        let account = store
            .find_mut(number)
            .ok_or_else(|| LedgerError::NotFound(number.to_string()))?;
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or_else(LedgerError::amount_overflow)?;
        let balance = account.balance;

        persist(&store)?;
        Ok(balance)
    }

    /// Returns the new balance.
    pub fn withdraw(&self, number: &str, amount: Decimal) -> Result<Decimal, LedgerError> {
        ensure_non_negative(amount)?;

        let mut store = self.store.write();
        let account = store
            .find_mut(number)
            .ok_or_else(|| LedgerError::NotFound(number.to_string()))?;
        if account.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                balance: account.balance,
                requested: amount,
            });
        }
        account.balance -= amount;
        let balance = account.balance;

        persist(&store)?;
        Ok(balance)
    }

    pub fn balance(&self, number: &str) -> Result<Decimal, LedgerError> {
        self.store
            .read()
            .find(number)
            .map(|account| account.balance)
            .ok_or_else(|| LedgerError::NotFound(number.to_string()))
    }

    pub fn remove_account(&self, number: &str) -> Result<(), LedgerError> {
        let mut store = self.store.write();
        let account = store
            .find(number)
            .ok_or_else(|| LedgerError::NotFound(number.to_string()))?;
        if !account.balance.is_zero() {
            return Err(LedgerError::NonZeroBalance {
                account: number.to_string(),
                balance: account.balance,
            });
        }

        store.remove(number);
        persist(&store)
    }

    pub fn total_balance(&self) -> Decimal {
        self.store.read().total_balance()
    }

    pub fn account_count(&self) -> usize {
        self.store.read().len()
    }

    /// Copy of every account, in ledger order.
    pub fn snapshot(&self) -> Vec<Account> {
        self.store.read().accounts().to_vec()
    }

    /// Replaces the whole ledger after checking the snapshot obeys the
    /// account invariants.
    pub fn restore(&self, accounts: Vec<Account>) -> Result<(), LedgerError> {
        validate_snapshot(&accounts)?;

        let mut store = self.store.write();
        store.replace_all(accounts);
        persist(&store)
    }
}

fn validate_snapshot(accounts: &[Account]) -> Result<(), LedgerError> {
    let mut seen = HashSet::new();
    for account in accounts {
        if !is_valid_account_number(&account.account_number) {
            return Err(LedgerError::invalid_snapshot(format!(
                "malformed account number '{}'",
                account.account_number
            )));
        }
        if account.balance < Decimal::ZERO {
            return Err(LedgerError::invalid_snapshot(format!(
                "account {} has a negative balance",
                account.account_number
            )));
        }
        if !seen.insert(account.account_number.as_str()) {
            return Err(LedgerError::invalid_snapshot(format!(
                "account {} appears twice",
                account.account_number
            )));
        }
    }
    Ok(())
}

fn ensure_non_negative(amount: Decimal) -> Result<(), LedgerError> {
    if amount < Decimal::ZERO {
        return Err(LedgerError::negative_amount(amount));
    }
    Ok(())
}

fn persist(store: &LedgerStore) -> Result<(), LedgerError> {
    store.persist().map_err(|source| {
        error!(path = %store.path().display(), error = %source, "failed to persist ledger");
        LedgerError::Persistence(source)
    })
}
