//! Command parsing and routing.
//!
//! A [`Dispatcher`] owns the registered [`CommandStrategy`] handlers and a
//! table from command code to handler, built once at startup. Lookups are
//! exact matches on the uppercased first token; misses get an edit-distance
//! suggestion.

pub mod strategies;

use std::{collections::HashMap, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{error, warn};

use crate::{i18n::Translator, pipeline::CommandProcessor};

/// Prefix of every error response.
pub const ERROR_MARKER: &str = "ER";

/// Largest edit distance for which a "did you mean" hint is offered.
const MAX_SUGGESTION_DISTANCE: usize = 2;

/// Handler for one family of commands.
#[async_trait]
pub trait CommandStrategy: Send + Sync {
    /// Codes this strategy answers, uppercase.
    fn commands(&self) -> &'static [&'static str];

    /// `args[0]` is the normalized command code. Expected failures are
    /// returned as `ER ...` responses; an `Err` means something broke and is
    /// reported to the client as an internal error.
    async fn execute(&self, args: &[String]) -> anyhow::Result<String>;
}

pub struct Dispatcher {
    strategies: Vec<Box<dyn CommandStrategy>>,
    routes: HashMap<&'static str, usize>,
    translator: Arc<Translator>,
}

impl Dispatcher {
    pub fn new(translator: Arc<Translator>) -> Self {
        Self {
            strategies: Vec::new(),
            routes: HashMap::new(),
            translator,
        }
    }

    /// Adds a strategy. A code claimed by an earlier strategy stays with it.
    pub fn register<S>(mut self, strategy: S) -> Self
    where
        S: CommandStrategy + 'static,
    {
        let index = self.strategies.len();
        for code in strategy.commands() {
            self.routes.entry(*code).or_insert(index);
        }
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn known_commands(&self) -> Vec<&'static str> {
        let mut codes: Vec<_> = self.routes.keys().copied().collect();
        codes.sort_unstable();
        codes
    }

    pub async fn dispatch(&self, line: &str) -> String {
        let mut args: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        let Some(first) = args.first_mut() else {
            return String::new();
        };
        *first = first.to_uppercase();
        let code = first.clone();

        let Some(&index) = self.routes.get(code.as_str()) else {
            return self.unknown_command(&code);
        };

        let execution = AssertUnwindSafe(self.strategies[index].execute(&args)).catch_unwind();
        match execution.await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                error!(command = %code, error = ?err, "command failed");
                self.translator.error_line("INTERNAL_ERROR")
            }
            Err(_) => {
                error!(command = %code, "command handler panicked");
                self.translator.error_line("INTERNAL_ERROR")
            }
        }
    }

    fn unknown_command(&self, code: &str) -> String {
        let unknown = self.translator.error_line("UNKNOWN_COMMAND");
        match self.suggest(code) {
            Some(suggestion) => {
                warn!(command = %code, suggestion, "unknown command");
                let hint = self.translator.message_with("DID_YOU_MEAN", &[&suggestion]);
                format!("{unknown} {hint}")
            }
            None => {
                warn!(command = %code, "unknown command");
                format!("{unknown} {}", self.translator.message("HELP_HINT"))
            }
        }
    }

    /// Closest known code within [`MAX_SUGGESTION_DISTANCE`]; ties go to the
    /// alphabetically first code.
    fn suggest(&self, code: &str) -> Option<&'static str> {
        self.routes
            .keys()
            .map(|known| (levenshtein(code, known), *known))
            .filter(|(distance, _)| *distance <= MAX_SUGGESTION_DISTANCE)
            .min()
            .map(|(_, known)| known)
    }
}

#[async_trait]
impl CommandProcessor for Dispatcher {
    async fn process(&self, line: &str, _source_ip: &str) -> String {
        self.dispatch(line).await
    }
}

pub fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}
