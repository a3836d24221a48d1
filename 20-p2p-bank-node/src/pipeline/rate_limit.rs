//! Per-source sliding-window rate limiting.

use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

use super::{command_code, CommandProcessor};
use crate::{config::ConfigHandle, i18n::Translator};

const WINDOW: Duration = Duration::from_secs(60);
/// Tracked sources above which idle windows are swept.
const PRUNE_THRESHOLD: usize = 1024;

/// Timestamps of accepted requests over the last minute, per source IP.
/// Each entry is guarded by its map shard, so concurrent sessions from one
/// address cannot both slip past the limit.
#[derive(Default)]
pub struct RateLimiter {
    windows: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the request and returns `true` when `source` is under `limit`.
    pub fn try_acquire(&self, source: &str, limit: usize, now: Instant) -> bool {
        let mut window = self.windows.entry(source.to_string()).or_default();
        while window
            .front()
            .is_some_and(|oldest| now.saturating_duration_since(*oldest) >= WINDOW)
        {
            window.pop_front();
        }

        if window.len() >= limit {
            return false;
        }
        window.push_back(now);
        true
    }

    pub fn tracked_sources(&self) -> usize {
        self.windows.len()
    }

    /// Drops sources that have been quiet for a whole window.
    pub fn prune(&self, now: Instant) {
        self.windows.retain(|source, window| {
            let active = window
                .back()
                .is_some_and(|latest| now.saturating_duration_since(*latest) < WINDOW);
            if !active {
                debug!(source = %source, "dropping idle rate limit window");
            }
            active
        });
    }
}

pub struct RateLimitStage<P> {
    inner: P,
    limiter: RateLimiter,
    config: ConfigHandle,
    translator: Arc<Translator>,
}

impl<P> RateLimitStage<P> {
    pub fn new(inner: P, config: ConfigHandle, translator: Arc<Translator>) -> Self {
        Self {
            inner,
            limiter: RateLimiter::new(),
            config,
            translator,
        }
    }
}

#[async_trait]
impl<P> CommandProcessor for RateLimitStage<P>
where
    P: CommandProcessor,
{
    async fn process(&self, line: &str, source_ip: &str) -> String {
        let limit = self.config.current().rate_limit_per_minute;
        let now = Instant::now();
        if self.limiter.tracked_sources() > PRUNE_THRESHOLD {
            self.limiter.prune(now);
        }
        if !self.limiter.try_acquire(source_ip, limit, now) {
            warn!(source = source_ip, command = %command_code(line), limit, "rate limit exceeded");
            return self.translator.error_line("RATE_LIMITED");
        }
        self.inner.process(line, source_ip).await
    }
}
