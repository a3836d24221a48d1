//! Request counters for the `HC` report.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;

use super::{command_code, CommandProcessor};
use crate::protocol::ERROR_MARKER;

/// Process-lifetime request counters. Constructed once by the node and
/// shared with whoever reports on them.
pub struct Metrics {
    started: Instant,
    total: AtomicU64,
    failed: AtomicU64,
    per_command: DashMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub failed_requests: u64,
    /// Percentage, 100 when nothing has been processed yet.
    pub success_rate: f64,
    pub command_distribution: BTreeMap<String, u64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            total: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            per_command: DashMap::new(),
        }
    }

    pub fn record(&self, code: &str, success: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        *self.per_command.entry(code.to_string()).or_insert(0) += 1;
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_requests = self.total.load(Ordering::Relaxed);
        let failed_requests = self.failed.load(Ordering::Relaxed);
        let success_rate = if total_requests == 0 {
            100.0
        } else {
            (1.0 - failed_requests as f64 / total_requests as f64) * 100.0
        };

        MetricsSnapshot {
            total_requests,
            failed_requests,
            success_rate,
            command_distribution: self
                .per_command
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
        }
    }
}

/// Outermost stage: counts every request, including ones the inner stages
/// reject or that unwind through it.
pub struct MetricsStage<P> {
    inner: P,
    metrics: Arc<Metrics>,
}

impl<P> MetricsStage<P> {
    pub fn new(inner: P, metrics: Arc<Metrics>) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl<P> CommandProcessor for MetricsStage<P>
where
    P: CommandProcessor,
{
    async fn process(&self, line: &str, source_ip: &str) -> String {
        let mut outcome = Outcome {
            metrics: &self.metrics,
            code: command_code(line),
            success: false,
        };
        let response = self.inner.process(line, source_ip).await;
        outcome.success = !response.starts_with(ERROR_MARKER);
        response
    }
}

/// Records on drop so that a panic or a dropped future still counts as a
/// failed request.
struct Outcome<'a> {
    metrics: &'a Metrics,
    code: String,
    success: bool,
}

impl Drop for Outcome<'_> {
    fn drop(&mut self) {
        self.metrics.record(&self.code, self.success);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl CommandProcessor for Fixed {
        async fn process(&self, _line: &str, _source_ip: &str) -> String {
            self.0.to_string()
        }
    }

    struct Panics;

    #[async_trait]
    impl CommandProcessor for Panics {
        async fn process(&self, _line: &str, _source_ip: &str) -> String {
            panic!("boom")
        }
    }

    #[tokio::test]
    async fn counts_successes_and_errors_by_code() {
        let metrics = Arc::new(Metrics::new());
        let ok = MetricsStage::new(Fixed("BC 10.0.0.1"), Arc::clone(&metrics));
        let failing = MetricsStage::new(Fixed("ER Account not found."), Arc::clone(&metrics));

        ok.process("bc", "127.0.0.1").await;
        ok.process("BC", "127.0.0.1").await;
        failing.process("AB 10001/10.0.0.1", "127.0.0.1").await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.command_distribution.get("BC"), Some(&2));
        assert_eq!(snapshot.command_distribution.get("AB"), Some(&1));
        assert!((snapshot.success_rate - 200.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn panicking_inner_stage_is_recorded_as_failure() {
        let metrics = Arc::new(Metrics::new());
        let stage = Arc::new(MetricsStage::new(Panics, Arc::clone(&metrics)));

        let result = tokio::spawn(async move { stage.process("HC", "127.0.0.1").await }).await;
        assert!(result.is_err());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.failed_requests, 1);
    }

    #[test]
    fn empty_metrics_report_full_success() {
        let snapshot = Metrics::new().snapshot();
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.success_rate, 100.0);
    }
}
