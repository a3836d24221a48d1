//! Message catalogs for every user-facing string.
//!
//! The `en` and `cs` catalogs are compiled in; a directory of `<code>.json`
//! files can add languages or override individual keys. Lookups fall back to
//! English and then to the key itself, so a missing entry never breaks a
//! response.

use std::{
    collections::{BTreeMap, HashMap},
    fmt::Display,
    path::Path,
};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::protocol::ERROR_MARKER;

const FALLBACK_LANGUAGE: &str = "en";

const BUILTIN_CATALOGS: &[(&str, &str)] = &[
    ("en", include_str!("../languages/en.json")),
    ("cs", include_str!("../languages/cs.json")),
];

type Catalog = HashMap<String, String>;

#[derive(Debug, thiserror::Error)]
#[error("language '{0}' is not available")]
pub struct UnknownLanguage(pub String);

pub struct Translator {
    catalogs: BTreeMap<String, Catalog>,
    active: RwLock<String>,
}

impl Translator {
    /// Compiled-in catalogs only, English active.
    pub fn builtin() -> Self {
        let mut catalogs = BTreeMap::new();
        for (code, raw) in BUILTIN_CATALOGS {
            match serde_json::from_str::<Catalog>(raw) {
                Ok(catalog) => {
                    catalogs.insert((*code).to_string(), catalog);
                }
                Err(error) => warn!(language = code, %error, "built-in catalog is malformed"),
            }
        }

        Self {
            catalogs,
            active: RwLock::new(FALLBACK_LANGUAGE.to_string()),
        }
    }

    /// Built-in catalogs merged with every `<code>.json` in `dir`, with
    /// `language` active when it exists.
    pub fn load(dir: &Path, language: &str) -> Self {
        let mut translator = Self::builtin();
        translator.merge_directory(dir);

        if let Err(error) = translator.set_language(language) {
            warn!(%error, fallback = FALLBACK_LANGUAGE, "configured language unavailable");
        }
        translator
    }

    fn merge_directory(&mut self, dir: &Path) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(error) => {
                debug!(dir = %dir.display(), %error, "no external language directory");
                return;
            }
        };

        for path in entries.filter_map(|entry| entry.ok().map(|entry| entry.path())) {
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(code) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let parsed = std::fs::read_to_string(&path)
                .map_err(|error| error.to_string())
                .and_then(|raw| {
                    serde_json::from_str::<Catalog>(&raw).map_err(|error| error.to_string())
                });
            match parsed {
                Ok(catalog) => self
                    .catalogs
                    .entry(code.to_lowercase())
                    .or_default()
                    .extend(catalog),
                Err(error) => warn!(path = %path.display(), %error, "skipping language file"),
            }
        }
    }

    pub fn message(&self, key: &str) -> String {
        let active = self.active.read();
        [active.as_str(), FALLBACK_LANGUAGE]
            .iter()
            .find_map(|code| self.catalogs.get(*code).and_then(|catalog| catalog.get(key)))
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    /// Same lookup as [`Translator::message`]; kept separate so call sites
    /// read as what they produce.
    pub fn error(&self, key: &str) -> String {
        self.message(key)
    }

    /// A complete wire error: `ER <localized message>`.
    pub fn error_line(&self, key: &str) -> String {
        format!("{ERROR_MARKER} {}", self.error(key))
    }

    /// Substitutes `{0}`, `{1}`, ... positionally.
    pub fn message_with(&self, key: &str, args: &[&dyn Display]) -> String {
        args.iter()
            .enumerate()
            .fold(self.message(key), |text, (index, arg)| {
                text.replace(&format!("{{{index}}}"), &arg.to_string())
            })
    }

    pub fn available_languages(&self) -> Vec<String> {
        self.catalogs.keys().cloned().collect()
    }

    pub fn active_language(&self) -> String {
        self.active.read().clone()
    }

    pub fn set_language(&self, code: &str) -> Result<(), UnknownLanguage> {
        let code = code.to_lowercase();
        if !self.catalogs.contains_key(&code) {
            return Err(UnknownLanguage(code));
        }
        *self.active.write() = code;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switches_language_and_falls_back_to_key() {
        let translator = Translator::builtin();
        assert_eq!(translator.error("INSUFFICIENT_FUNDS"), "Insufficient funds.");

        translator.set_language("CS").unwrap();
        assert_eq!(translator.active_language(), "cs");
        assert_eq!(
            translator.error("INSUFFICIENT_FUNDS"),
            "Nedostatek finančních prostředků."
        );
        assert_eq!(translator.message("NOT_A_KEY"), "NOT_A_KEY");
    }

    #[test]
    fn rejects_unknown_language() {
        let translator = Translator::builtin();
        assert!(translator.set_language("xyz").is_err());
        assert_eq!(translator.active_language(), "en");
        assert_eq!(translator.available_languages(), vec!["cs", "en"]);
    }

    #[test]
    fn substitutes_positional_arguments() {
        let translator = Translator::builtin();
        assert_eq!(
            translator.message_with("DID_YOU_MEAN", &[&"AC"]),
            "Did you mean AC?"
        );
        assert_eq!(translator.error_line("NO_RESPONSE"), "ER No response.");
    }

    #[test]
    fn directory_catalogs_add_languages_and_override_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("de.json"), r#"{ "NO_HISTORY": "Kein Verlauf." }"#).unwrap();
        std::fs::write(dir.path().join("en.json"), r#"{ "NO_HISTORY": "Nothing yet." }"#).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

        let translator = Translator::load(dir.path(), "de");
        assert_eq!(translator.message("NO_HISTORY"), "Kein Verlauf.");
        // Keys missing from the active catalog come from English.
        assert_eq!(translator.message("NO_RESPONSE"), "No response.");
        translator.set_language("en").unwrap();
        assert_eq!(translator.message("NO_HISTORY"), "Nothing yet.");
        assert!(!translator.available_languages().contains(&"broken".to_string()));
    }
}
