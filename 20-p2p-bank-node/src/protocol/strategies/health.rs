use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use sysinfo::{Pid, System};

use crate::{
    ledger::AccountService,
    pipeline::{Metrics, MetricsSnapshot},
    protocol::CommandStrategy,
};

pub struct HealthStrategy {
    ledger: Arc<AccountService>,
    metrics: Arc<Metrics>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthReport {
    status: &'static str,
    uptime_seconds: u64,
    accounts: usize,
    total_balance: Decimal,
    /// Resident set size of this process, when the platform reports it.
    memory_bytes: Option<u64>,
    requests: MetricsSnapshot,
}

impl HealthStrategy {
    pub fn new(ledger: Arc<AccountService>, metrics: Arc<Metrics>) -> Self {
        Self { ledger, metrics }
    }

    fn report(&self) -> HealthReport {
        HealthReport {
            status: "OK",
            uptime_seconds: self.metrics.uptime().as_secs(),
            accounts: self.ledger.account_count(),
            total_balance: self.ledger.total_balance(),
            memory_bytes: process_memory(),
            requests: self.metrics.snapshot(),
        }
    }
}

#[async_trait]
impl CommandStrategy for HealthStrategy {
    fn commands(&self) -> &'static [&'static str] {
        &["HC"]
    }

    async fn execute(&self, _args: &[String]) -> anyhow::Result<String> {
        let report = serde_json::to_string(&self.report())?;
        Ok(format!("HC {report}"))
    }
}

fn process_memory() -> Option<u64> {
    let mut system = System::new();
    let pid = Pid::from(std::process::id() as usize);
    system.refresh_process(pid);
    system.process(pid).map(|process| process.memory())
}
