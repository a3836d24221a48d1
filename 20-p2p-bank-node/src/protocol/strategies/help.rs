use std::sync::Arc;

use async_trait::async_trait;

use crate::{i18n::Translator, protocol::CommandStrategy};

/// Listed in this order, including the session-level commands.
const DOCUMENTED: &[&str] = &[
    "BC", "AC", "AD", "AW", "AB", "AR", "BA", "BN", "RP", "HC", "LANG", "BACKUP", "RESTORE",
    "HISTORY", "EXECUTE", "EXIT", "HELP",
];

pub struct HelpStrategy {
    translator: Arc<Translator>,
}

impl HelpStrategy {
    pub fn new(translator: Arc<Translator>) -> Self {
        Self { translator }
    }
}

#[async_trait]
impl CommandStrategy for HelpStrategy {
    fn commands(&self) -> &'static [&'static str] {
        &["HELP"]
    }

    async fn execute(&self, _args: &[String]) -> anyhow::Result<String> {
        let mut lines = vec![self.translator.message("HELP_HEADER")];
        lines.extend(DOCUMENTED.iter().map(|code| {
            let text = self.translator.message(&format!("HELP_{code}"));
            format!("  {code:<8} - {text}")
        }));
        Ok(lines.join("\n"))
    }
}
