use std::{io, path::PathBuf, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Local;
use tracing::{info, warn};

use super::{on_ledger, render_ledger};
use crate::{
    i18n::Translator,
    ledger::{store::write_atomically, Account, AccountService},
    protocol::CommandStrategy,
};

/// `BACKUP [path]` writes the ledger as a pretty JSON array;
/// `RESTORE <path>` validates such a file and replaces the ledger with it.
pub struct BackupStrategy {
    ledger: Arc<AccountService>,
    translator: Arc<Translator>,
}

impl BackupStrategy {
    pub fn new(ledger: Arc<AccountService>, translator: Arc<Translator>) -> Self {
        Self { ledger, translator }
    }

    async fn backup(&self, path: Option<&str>) -> anyhow::Result<String> {
        let path = match path {
            Some(path) => path.to_string(),
            None => Local::now().format("backup_%Y%m%d_%H%M%S.json").to_string(),
        };
        let snapshot = self.ledger.snapshot();
        let encoded = serde_json::to_vec_pretty(&snapshot)?;

        let target = PathBuf::from(&path);
        tokio::task::spawn_blocking(move || write_atomically(&target, &encoded))
            .await?
            .with_context(|| format!("failed to write backup {path}"))?;

        info!(%path, accounts = snapshot.len(), "ledger backed up");
        Ok(format!(
            "BACKUP {}: {path}",
            self.translator.message("BACKUP_CREATED")
        ))
    }

    async fn restore(&self, path: &str) -> anyhow::Result<String> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(format!("{} {path}", self.translator.error_line("FILE_NOT_FOUND")));
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read backup {path}"));
            }
        };

        let accounts: Vec<Account> = match serde_json::from_str(&raw) {
            Ok(accounts) => accounts,
            Err(err) => {
                warn!(%path, error = %err, "rejecting malformed backup");
                return Ok(self.translator.error_line("INVALID_BACKUP"));
            }
        };

        let count = accounts.len();
        let outcome = on_ledger(&self.ledger, move |ledger| ledger.restore(accounts))
            .await?
            .map(|()| {
                info!(%path, accounts = count, "ledger restored");
                format!("RESTORE {}", self.translator.message("RESTORE_COMPLETED"))
            });
        render_ledger(&self.translator, outcome)
    }
}

#[async_trait]
impl CommandStrategy for BackupStrategy {
    fn commands(&self) -> &'static [&'static str] {
        &["BACKUP", "RESTORE"]
    }

    async fn execute(&self, args: &[String]) -> anyhow::Result<String> {
        match (args[0].as_str(), args.get(1)) {
            ("BACKUP", path) => self.backup(path.map(String::as_str)).await,
            ("RESTORE", Some(path)) => self.restore(path).await,
            ("RESTORE", None) => Ok(self.translator.error_line("INVALID_FORMAT")),
            (other, _) => anyhow::bail!("{other} is not a backup command"),
        }
    }
}
