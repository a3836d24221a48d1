//! Node configuration and the live snapshot every component reads from.
//!
//! Components never cache a [`NodeConfig`]; they call [`ConfigHandle::current`]
//! at each operation boundary so that a reloaded file takes effect on the
//! next command without restarting sessions.

use std::{
    net::UdpSocket,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::error::ConfigError;

pub const DEFAULT_PORT: u16 = 65525;
pub const LOOPBACK_IP: &str = "127.0.0.1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeConfig {
    pub bind_address: String,
    pub port: u16,
    /// Advertised IPv4 address. Empty means "detect at startup".
    pub node_ip: String,
    pub connect_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub response_timeout_ms: u64,
    pub client_idle_timeout_ms: u64,
    pub max_concurrent_connections: usize,
    pub rate_limit_per_minute: usize,
    pub robbery_concurrency: usize,
    pub data_file: PathBuf,
    pub language: String,
    pub languages_dir: PathBuf,
    /// Plain-text copy of the console log. Empty disables it.
    pub log_file: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            node_ip: String::new(),
            connect_timeout_ms: 5_000,
            handshake_timeout_ms: 5_000,
            response_timeout_ms: 5_000,
            client_idle_timeout_ms: 300_000,
            max_concurrent_connections: 100,
            rate_limit_per_minute: 100,
            robbery_concurrency: 20,
            data_file: PathBuf::from("accounts.json"),
            language: "en".to_string(),
            languages_dir: PathBuf::from("languages"),
            log_file: PathBuf::from("node.log"),
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Fills in the advertised address when none was configured.
    pub fn with_resolved_ip(mut self) -> Self {
        if self.node_ip.trim().is_empty() {
            self.node_ip = detect_node_ip();
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("connectTimeoutMs", self.connect_timeout_ms as usize),
            ("handshakeTimeoutMs", self.handshake_timeout_ms as usize),
            ("responseTimeoutMs", self.response_timeout_ms as usize),
            ("clientIdleTimeoutMs", self.client_idle_timeout_ms as usize),
            ("maxConcurrentConnections", self.max_concurrent_connections),
            ("rateLimitPerMinute", self.rate_limit_per_minute),
            ("robberyConcurrency", self.robbery_concurrency),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }
        if self.data_file.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("dataFile must not be empty".into()));
        }
        if self.language.trim().is_empty() {
            return Err(ConfigError::Invalid("language must not be empty".into()));
        }
        Ok(())
    }

    pub fn log_path(&self) -> Option<&Path> {
        Some(self.log_file.as_path()).filter(|path| !path.as_os_str().is_empty())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn client_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.client_idle_timeout_ms)
    }
}

/// Best-effort discovery of the outward-facing IPv4 address. Connecting a UDP
/// socket only selects a route; nothing is sent.
pub fn detect_node_ip() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .ok()
        .map(|addr| addr.ip())
        .filter(|ip| ip.is_ipv4() && !ip.is_unspecified())
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| LOOPBACK_IP.to_string())
}

/// Cheaply cloneable access to the current configuration snapshot.
#[derive(Clone)]
pub struct ConfigHandle {
    sender: Arc<watch::Sender<Arc<NodeConfig>>>,
}

impl ConfigHandle {
    pub fn new(config: NodeConfig) -> Self {
        let (sender, _) = watch::channel(Arc::new(config));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn current(&self) -> Arc<NodeConfig> {
        Arc::clone(&self.sender.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<NodeConfig>> {
        self.sender.subscribe()
    }

    /// Validates and publishes a new snapshot.
    pub fn replace(&self, config: NodeConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.sender.send_replace(Arc::new(config));
        Ok(())
    }

    /// Publishes a reloaded file. The listener is already bound, so the
    /// endpoint fields keep their current values.
    pub fn reload(&self, mut config: NodeConfig) -> Result<(), ConfigError> {
        let current = self.current();
        config.port = current.port;
        config.bind_address = current.bind_address.clone();
        if config.node_ip.trim().is_empty() {
            config.node_ip = current.node_ip.clone();
        }
        self.replace(config)
    }
}

/// Reloads `path` into `handle` whenever the file changes on disk. The
/// returned watcher must be kept alive for as long as reloads are wanted.
pub fn watch_config_file(path: PathBuf, handle: ConfigHandle) -> notify::Result<RecommendedWatcher> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        let _ = events_tx.send(event);
    })?;

    // Watch the directory: editors often replace the file instead of writing it in place.
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    watcher.watch(&directory, RecursiveMode::NonRecursive)?;

    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                Ok(event) if touches_file(&event, &path) => reload_from_file(&path, &handle),
                Ok(_) => {}
                Err(error) => warn!(?error, "config watcher error"),
            }
        }
    });

    Ok(watcher)
}

fn touches_file(event: &notify::Event, path: &Path) -> bool {
    let relevant = event.kind.is_modify() || event.kind.is_create();
    relevant
        && event
            .paths
            .iter()
            .any(|changed| changed.file_name() == path.file_name())
}

fn reload_from_file(path: &Path, handle: &ConfigHandle) {
    match NodeConfig::from_file(path).and_then(|config| handle.reload(config)) {
        Ok(()) => info!(path = %path.display(), "configuration reloaded"),
        Err(error) => warn!(path = %path.display(), error = %error, "ignoring invalid configuration"),
    }
}
