use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::{
    i18n::Translator,
    protocol::CommandStrategy,
    scanner::{plan, HeistPlan, SubnetScanner},
};

/// `RP <amount>`: scans the subnet and plans which banks to rob.
pub struct RobberyStrategy {
    scanner: SubnetScanner,
    translator: Arc<Translator>,
}

impl RobberyStrategy {
    pub fn new(scanner: SubnetScanner, translator: Arc<Translator>) -> Self {
        Self {
            scanner,
            translator,
        }
    }

    fn render(&self, target: Decimal, heist: HeistPlan) -> String {
        match heist {
            HeistPlan::Planned {
                victims,
                loot,
                clients,
            } => {
                let mut lines = vec![format!("RP {}", self.translator.message("RP_PLANNED"))];
                lines.extend(victims.iter().map(|bank| {
                    format!(
                        "Target: {:<15} | Loot: {:>8} | Clients: {:>3}",
                        bank.address, bank.total_balance, bank.client_count
                    )
                }));
                lines.push(format!("Total: {loot} (Victims: {clients})"));
                lines.join("\n")
            }
            HeistPlan::Unreachable { maximum, banks } => format!(
                "RP {}",
                self.translator
                    .message_with("RP_UNREACHABLE", &[&target, &maximum, &banks])
            ),
        }
    }
}

#[async_trait]
impl CommandStrategy for RobberyStrategy {
    fn commands(&self) -> &'static [&'static str] {
        &["RP"]
    }

    async fn execute(&self, args: &[String]) -> anyhow::Result<String> {
        let target = match args.get(1).map(|raw| Decimal::from_str(raw)) {
            Some(Ok(target)) if target >= Decimal::ZERO => target,
            Some(_) => return Ok(self.translator.error_line("INVALID_AMOUNT")),
            None => return Ok(self.translator.error_line("INVALID_FORMAT")),
        };

        let banks = self.scanner.scan().await;
        Ok(self.render(target, plan(banks, target)))
    }
}
