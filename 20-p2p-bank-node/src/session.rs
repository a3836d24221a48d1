//! Per-connection state and the commands that never leave the connection:
//! `EXIT`, `HISTORY` and `EXECUTE`.

use std::{collections::VecDeque, io, sync::Arc};

use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::{
    i18n::Translator,
    pipeline::{command_code, CommandProcessor},
    wire::{read_bounded_line, InboundLine, MAX_COMMAND_BYTES},
};

/// Commands kept for `HISTORY`.
pub const HISTORY_CAPACITY: usize = 10;

/// Largest script `EXECUTE` will load.
pub const MAX_SCRIPT_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Default)]
pub struct SessionHistory {
    entries: VecDeque<String>,
}

impl SessionHistory {
    pub fn record(&mut self, command: &str) {
        if self.entries.len() == HISTORY_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(command.to_string());
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn render(&self, translator: &Translator) -> String {
        if self.entries.is_empty() {
            return translator.message("NO_HISTORY");
        }
        self.entries
            .iter()
            .enumerate()
            .map(|(index, command)| format!("{}: {command}", index + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub struct Session {
    source_ip: String,
    history: SessionHistory,
    processor: Arc<dyn CommandProcessor>,
    translator: Arc<Translator>,
}

impl Session {
    pub fn new(
        source_ip: String,
        processor: Arc<dyn CommandProcessor>,
        translator: Arc<Translator>,
    ) -> Self {
        Self {
            source_ip,
            history: SessionHistory::default(),
            processor,
            translator,
        }
    }

    pub fn history(&self) -> &SessionHistory {
        &self.history
    }

    /// The response to write back, or `None` when the client asked to leave.
    pub async fn handle(&mut self, inbound: InboundLine) -> Option<String> {
        let line = match inbound {
            InboundLine::Text(line) => line,
            InboundLine::TooLong => return Some(self.translator.error_line("COMMAND_TOO_LONG")),
        };
        let command = line.trim();
        if command.is_empty() {
            return Some(String::new());
        }

        match command_code(command).as_str() {
            "EXIT" if is_bare(command) => None,
            "HISTORY" if is_bare(command) => Some(self.history.render(&self.translator)),
            "EXECUTE" => {
                let response = self.execute_script(script_path(command)).await;
                self.history.record(command);
                Some(response)
            }
            _ => {
                self.history.record(command);
                Some(self.processor.process(command, &self.source_ip).await)
            }
        }
    }

    /// Replays every non-blank line of a local file through the pipeline and
    /// returns one response per line. Replayed lines are not recorded.
    async fn execute_script(&self, path: Option<&str>) -> String {
        let Some(path) = path else {
            return self.translator.error_line("INVALID_FORMAT");
        };

        let script = match read_script(path).await {
            Ok(script) => script,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return format!("{} {path}", self.translator.error_line("FILE_NOT_FOUND"));
            }
            Err(err) => {
                warn!(%path, error = %err, "failed to read script");
                return format!("{} {err}", self.translator.error_line("SCRIPT_FAILED"));
            }
        };

        // Script lines obey the same length cap as lines read from a socket.
        let mut remaining = script.as_slice();
        let mut responses = Vec::new();
        while let Ok(Some(inbound)) = read_bounded_line(&mut remaining, MAX_COMMAND_BYTES).await {
            let line = match inbound {
                InboundLine::Text(line) => line,
                InboundLine::TooLong => {
                    responses.push(self.translator.error_line("COMMAND_TOO_LONG"));
                    continue;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            debug!(%path, command = %line, "replaying script line");
            responses.push(self.processor.process(line, &self.source_ip).await);
        }
        responses.join("\n")
    }
}

async fn read_script(path: &str) -> io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut script = Vec::new();
    file.take(MAX_SCRIPT_BYTES + 1).read_to_end(&mut script).await?;
    if script.len() as u64 > MAX_SCRIPT_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("script exceeds {MAX_SCRIPT_BYTES} bytes"),
        ));
    }
    Ok(script)
}

fn is_bare(command: &str) -> bool {
    command.split_whitespace().nth(1).is_none()
}

fn script_path(command: &str) -> Option<&str> {
    command
        .split_once(char::is_whitespace)
        .map(|(_, rest)| rest.trim())
        .filter(|path| !path.is_empty())
}
