//! Line-delimited JSON persistence for the ledger.
//!
//! Every mutation rewrites the whole file: the snapshot goes to a sibling
//! `<file>.tmp` first and is then renamed over the primary. Loading only ever
//! reads the primary, so an interrupted write leaves the previous snapshot
//! intact and the orphaned temp file is ignored.

use std::{
    ffi::OsString,
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::account::Account;

pub struct LedgerStore {
    path: PathBuf,
    accounts: Vec<Account>,
}

impl LedgerStore {
    /// Loads the ledger at `path`. A missing file is an empty ledger;
    /// malformed lines are skipped.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let accounts = match fs::read_to_string(&path) {
            Ok(raw) => parse_snapshot(&raw, &path),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no ledger file yet, starting empty");
                Vec::new()
            }
            Err(error) => return Err(error),
        };
        Ok(Self { path, accounts })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn find(&self, number: &str) -> Option<&Account> {
        self.accounts
            .iter()
            .find(|account| account.account_number == number)
    }

    pub fn find_mut(&mut self, number: &str) -> Option<&mut Account> {
        self.accounts
            .iter_mut()
            .find(|account| account.account_number == number)
    }

    pub fn insert(&mut self, account: Account) {
        self.accounts.push(account);
    }

    pub fn remove(&mut self, number: &str) -> Option<Account> {
        let index = self
            .accounts
            .iter()
            .position(|account| account.account_number == number)?;
        Some(self.accounts.remove(index))
    }

    pub fn replace_all(&mut self, accounts: Vec<Account>) {
        self.accounts = accounts;
    }

    pub fn total_balance(&self) -> Decimal {
        self.accounts.iter().map(|account| account.balance).sum()
    }

    /// Durably replaces the on-disk snapshot with the in-memory ledger.
    pub fn persist(&self) -> io::Result<()> {
        let staged = self.stage()?;
        fs::rename(&staged, &self.path)
    }

    /// First half of [`LedgerStore::persist`]: writes and syncs the temp file.
    fn stage(&self) -> io::Result<PathBuf> {
        let mut encoded = Vec::new();
        for account in &self.accounts {
            serde_json::to_writer(&mut encoded, account)?;
            encoded.push(b'\n');
        }

        let staged = temp_path(&self.path);
        write_synced(&staged, &encoded)?;
        Ok(staged)
    }
}

fn parse_snapshot(raw: &str, path: &Path) -> Vec<Account> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(index, line)| match serde_json::from_str::<Account>(line) {
            Ok(account) => Some(account),
            Err(error) => {
                warn!(path = %path.display(), line = index + 1, %error, "skipping malformed ledger line");
                None
            }
        })
        .collect()
}

/// Sibling path used while a snapshot is being written.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Writes `contents` to `path` through a temp file and an atomic rename.
pub fn write_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    let staged = temp_path(path);
    write_synced(&staged, contents)?;
    fs::rename(&staged, path)
}

fn write_synced(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()
}
