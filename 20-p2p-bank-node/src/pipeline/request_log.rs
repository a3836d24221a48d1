use std::time::Instant;

use async_trait::async_trait;
use tracing::info;

use super::{command_code, CommandProcessor};

const SUMMARY_CHARS: usize = 20;

pub struct RequestLogging<P> {
    inner: P,
}

impl<P> RequestLogging<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<P> CommandProcessor for RequestLogging<P>
where
    P: CommandProcessor,
{
    async fn process(&self, line: &str, source_ip: &str) -> String {
        let code = command_code(line);
        info!(source = source_ip, command = %code, "incoming request");

        let started = Instant::now();
        let response = self.inner.process(line, source_ip).await;
        info!(
            source = source_ip,
            command = %code,
            response = %summarize(&response),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request completed"
        );
        response
    }
}

/// First few characters of a response on one line, for the log.
fn summarize(response: &str) -> String {
    let mut summary: String = response
        .chars()
        .take(SUMMARY_CHARS)
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    if response.chars().count() > SUMMARY_CHARS {
        summary.push('…');
    }
    summary
}
