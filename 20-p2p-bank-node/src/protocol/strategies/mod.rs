//! One [`CommandStrategy`](super::CommandStrategy) per command family.

pub mod account;
pub mod backup;
pub mod bank;
pub mod health;
pub mod help;
pub mod language;
pub mod robbery;

pub use account::AccountStrategy;
pub use backup::BackupStrategy;
pub use bank::BankStrategy;
pub use health::HealthStrategy;
pub use help::HelpStrategy;
pub use language::LanguageStrategy;
pub use robbery::RobberyStrategy;

use std::sync::Arc;

use anyhow::Context;

use crate::{error::LedgerError, i18n::Translator, ledger::AccountService};

/// Runs a ledger call on the blocking pool. Mutations rewrite and fsync the
/// ledger file while holding the store lock.
async fn on_ledger<T, F>(ledger: &Arc<AccountService>, work: F) -> anyhow::Result<T>
where
    F: FnOnce(&AccountService) -> T + Send + 'static,
    T: Send + 'static,
{
    let ledger = Arc::clone(ledger);
    tokio::task::spawn_blocking(move || work(&ledger))
        .await
        .context("ledger task failed")
}

/// Business-rule violations become `ER` lines in the active language;
/// anything without a catalog key is a real failure and propagates.
fn render_ledger(
    translator: &Translator,
    outcome: Result<String, LedgerError>,
) -> anyhow::Result<String> {
    match outcome {
        Ok(response) => Ok(response),
        Err(err) => match err.message_key() {
            Some(key) => Ok(translator.error_line(key)),
            None => Err(err).context("ledger operation failed"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn ledger_work_leaves_the_runtime_thread() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(AccountService::open(dir.path().join("accounts.json")).unwrap());
        let runtime_thread = std::thread::current().id();

        let (worker_thread, created) = on_ledger(&ledger, |ledger| {
            (std::thread::current().id(), ledger.create_account("127.0.0.1"))
        })
        .await
        .unwrap();

        assert_ne!(worker_thread, runtime_thread);
        assert!(created.is_ok());
        assert_eq!(ledger.account_count(), 1);
    }
}
