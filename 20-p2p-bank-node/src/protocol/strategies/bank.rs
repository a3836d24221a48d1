use std::sync::Arc;

use async_trait::async_trait;

use super::on_ledger;
use crate::{config::ConfigHandle, ledger::AccountService, protocol::CommandStrategy};

/// `BC`, `BA` and `BN`: facts about this node as a whole.
pub struct BankStrategy {
    ledger: Arc<AccountService>,
    config: ConfigHandle,
}

impl BankStrategy {
    pub fn new(ledger: Arc<AccountService>, config: ConfigHandle) -> Self {
        Self { ledger, config }
    }
}

#[async_trait]
impl CommandStrategy for BankStrategy {
    fn commands(&self) -> &'static [&'static str] {
        &["BC", "BA", "BN"]
    }

    async fn execute(&self, args: &[String]) -> anyhow::Result<String> {
        match args[0].as_str() {
            "BC" => Ok(format!("BC {}", self.config.current().node_ip)),
            "BA" => {
                let total = on_ledger(&self.ledger, AccountService::total_balance).await?;
                Ok(format!("BA {total}"))
            }
            "BN" => {
                let count = on_ledger(&self.ledger, AccountService::account_count).await?;
                Ok(format!("BN {count}"))
            }
            other => anyhow::bail!("{other} is not a bank command"),
        }
    }
}
