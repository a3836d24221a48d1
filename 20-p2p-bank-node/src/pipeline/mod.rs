//! The per-command processing chain.
//!
//! Every stage implements [`CommandProcessor`] and owns the stage it wraps,
//! so the chain is assembled once at startup by plain nesting:
//!
//! ```text
//! MetricsStage -> RateLimitStage -> RequestLogging -> Dispatcher
//! ```
//!
//! Stages only depend on the trait, so they can be reordered freely.

pub mod metrics;
pub mod rate_limit;
pub mod request_log;

use std::sync::Arc;

use async_trait::async_trait;

pub use metrics::{Metrics, MetricsSnapshot, MetricsStage};
pub use rate_limit::{RateLimitStage, RateLimiter};
pub use request_log::RequestLogging;

use crate::{config::ConfigHandle, i18n::Translator};

/// One raw command line in, one response out. Never fails: problems are
/// rendered as `ER ...` responses.
#[async_trait]
pub trait CommandProcessor: Send + Sync {
    async fn process(&self, line: &str, source_ip: &str) -> String;
}

#[async_trait]
impl<P> CommandProcessor for Arc<P>
where
    P: CommandProcessor + ?Sized,
{
    async fn process(&self, line: &str, source_ip: &str) -> String {
        (**self).process(line, source_ip).await
    }
}

/// First whitespace-delimited token, uppercased. Empty for blank input.
pub fn command_code(line: &str) -> String {
    line.split_whitespace()
        .next()
        .map(str::to_uppercase)
        .unwrap_or_default()
}

/// Wraps `inner` in the production stage order.
pub fn compose<P>(
    inner: P,
    metrics: Arc<Metrics>,
    config: ConfigHandle,
    translator: Arc<Translator>,
) -> Arc<dyn CommandProcessor>
where
    P: CommandProcessor + 'static,
{
    let logged = RequestLogging::new(inner);
    let limited = RateLimitStage::new(logged, config, translator);
    Arc::new(MetricsStage::new(limited, metrics))
}
