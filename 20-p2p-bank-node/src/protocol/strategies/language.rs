use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::{i18n::Translator, protocol::CommandStrategy};

/// `LANG` lists the catalogs; `LANG <code>` switches the node-wide language.
pub struct LanguageStrategy {
    translator: Arc<Translator>,
}

impl LanguageStrategy {
    pub fn new(translator: Arc<Translator>) -> Self {
        Self { translator }
    }
}

#[async_trait]
impl CommandStrategy for LanguageStrategy {
    fn commands(&self) -> &'static [&'static str] {
        &["LANG"]
    }

    async fn execute(&self, args: &[String]) -> anyhow::Result<String> {
        let translator = &self.translator;
        match args {
            [_] => {
                let languages = translator.available_languages();
                if languages.is_empty() {
                    return Ok(translator.error_line("LANG_NOT_FOUND"));
                }
                Ok(format!(
                    "{}: {}",
                    translator.message("LANG_AVAILABLE"),
                    languages.join(", ")
                ))
            }
            [_, code] => match translator.set_language(code) {
                Ok(()) => {
                    let active = translator.active_language();
                    info!(language = %active, "language switched");
                    Ok(format!("{} {active}", translator.message("LANG_CHANGED")))
                }
                Err(_) => Ok(translator.error_line("LANG_NOT_FOUND")),
            },
            _ => Ok(translator.error_line("INVALID_FORMAT")),
        }
    }
}
