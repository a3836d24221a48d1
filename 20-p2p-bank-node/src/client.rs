//! Outbound connections to other bank nodes.
//!
//! One TCP connection is kept per `ip:port`. Each endpoint carries its own
//! async mutex, so at most one command is in flight per peer while calls to
//! different peers proceed independently. Any failure drops the connection;
//! the next call reconnects from scratch.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use tokio::{
    io::BufReader,
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::Mutex,
    time::{timeout, Duration},
};
use tracing::{debug, warn};

use crate::{
    config::{ConfigHandle, NodeConfig},
    error::ClientError,
    i18n::Translator,
    wire::{read_line, write_line},
};

/// Sends one command line to a peer and returns its one-line reply.
///
/// Implementations never fail: every transport problem comes back as an
/// `ER ...` line, so callers can forward the result verbatim.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn send_command(&self, ip: &str, port: u16, command: &str) -> String;
}

pub struct PooledClient {
    config: ConfigHandle,
    translator: Arc<Translator>,
    endpoints: DashMap<String, Arc<Endpoint>>,
}

impl PooledClient {
    pub fn new(config: ConfigHandle, translator: Arc<Translator>) -> Self {
        Self {
            config,
            translator,
            endpoints: DashMap::new(),
        }
    }

    /// Number of endpoints whose last exchange succeeded or is in flight.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Drops every pooled connection.
    pub fn close_all(&self) {
        self.endpoints.clear();
    }

    async fn exchange(&self, ip: &str, port: u16, command: &str) -> Result<String, ClientError> {
        let address = format!("{ip}:{port}");
        let endpoint = self
            .endpoints
            .entry(address.clone())
            .or_insert_with(|| Arc::new(Endpoint::new(address.clone())))
            .clone();
        let outcome = endpoint.send(command, &self.config.current()).await;
        if outcome.is_err() {
            // Failed endpoints are forgotten so unreachable addresses do not pile up.
            self.endpoints
                .remove_if(&address, |_, current| Arc::ptr_eq(current, &endpoint));
        }
        outcome
    }
}

#[async_trait]
impl PeerClient for PooledClient {
    async fn send_command(&self, ip: &str, port: u16, command: &str) -> String {
        match self.exchange(ip, port, command).await {
            Ok(response) => response,
            Err(error) => {
                warn!(peer = %format!("{ip}:{port}"), error = %error, "peer exchange failed, connection reset");
                self.translator.error_line(error.message_key())
            }
        }
    }
}

struct Endpoint {
    address: String,
    connection: Mutex<Option<Connection>>,
}

impl Endpoint {
    fn new(address: String) -> Self {
        Self {
            address,
            connection: Mutex::new(None),
        }
    }

    async fn send(&self, command: &str, config: &NodeConfig) -> Result<String, ClientError> {
        let mut slot = self.connection.lock().await;

        let pooled = slot
            .take()
            .and_then(|mut existing| existing.is_reusable().then_some(existing));
        let mut connection = match pooled {
            Some(connection) => connection,
            None => Connection::open(&self.address, config).await?,
        };

        // On error the connection is dropped here instead of going back to the slot.
        let response = connection
            .exchange(&self.address, command, config.response_timeout())
            .await?;
        *slot = Some(connection);
        Ok(response)
    }
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    /// Connects and consumes the peer's greeting line.
    async fn open(address: &str, config: &NodeConfig) -> Result<Self, ClientError> {
        let stream = match timeout(config.connect_timeout(), TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(failed(address, source)),
            Err(_) => return Err(ClientError::ConnectTimeout(address.to_string())),
        };
        if let Err(error) = stream.set_nodelay(true) {
            debug!(peer = address, ?error, "could not disable nagle");
        }

        let (reader, writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        match timeout(config.handshake_timeout(), read_line(&mut reader)).await {
            Ok(Ok(Some(greeting))) => debug!(peer = address, %greeting, "connected to peer"),
            Ok(Ok(None)) => return Err(ClientError::NoResponse(address.to_string())),
            Ok(Err(source)) => return Err(failed(address, source)),
            Err(_) => return Err(ClientError::HandshakeTimeout(address.to_string())),
        }

        Ok(Self { reader, writer })
    }

    /// A pooled connection is reused only when the peer has neither closed it
    /// nor sent anything unsolicited since the last exchange.
    fn is_reusable(&mut self) -> bool {
        if !self.reader.buffer().is_empty() {
            return false;
        }
        let mut peeked = [0u8; 1];
        self.reader.get_mut().peek(&mut peeked).now_or_never().is_none()
    }

    async fn exchange(
        &mut self,
        address: &str,
        command: &str,
        response_timeout: Duration,
    ) -> Result<String, ClientError> {
        write_line(&mut self.writer, command)
            .await
            .map_err(|source| failed(address, source))?;

        match timeout(response_timeout, read_line(&mut self.reader)).await {
            Ok(Ok(Some(response))) => Ok(response),
            Ok(Ok(None)) => Err(ClientError::NoResponse(address.to_string())),
            Ok(Err(source)) => Err(failed(address, source)),
            Err(_) => Err(ClientError::ResponseTimeout(address.to_string())),
        }
    }
}

/// One-shot request on a fresh connection. Multi-line replies (`HELP`,
/// `RP`, `HISTORY`) have no terminator, so lines are collected until the
/// peer stays quiet for `settle` or closes the connection.
pub async fn request(
    address: &str,
    command: &str,
    config: &NodeConfig,
    settle: Duration,
) -> Result<Vec<String>, ClientError> {
    let mut connection = Connection::open(address, config).await?;
    let first = connection
        .exchange(address, command, config.response_timeout())
        .await?;

    let mut lines = vec![first];
    while let Ok(Ok(Some(line))) = timeout(settle, read_line(&mut connection.reader)).await {
        lines.push(line);
    }
    Ok(lines)
}

fn failed(address: &str, source: std::io::Error) -> ClientError {
    ClientError::ConnectionFailed {
        endpoint: address.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;

    fn client() -> PooledClient {
        let config = ConfigHandle::new(NodeConfig {
            connect_timeout_ms: 500,
            handshake_timeout_ms: 200,
            response_timeout_ms: 200,
            ..NodeConfig::default()
        });
        PooledClient::new(config, Arc::new(Translator::builtin()))
    }

    /// Greets every connection and answers `n` commands with `OK <command>`
    /// before closing it.
    async fn spawn_peer(answers_per_connection: usize) -> (u16, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let (reader, mut writer) = stream.into_split();
                    let mut lines = tokio::io::BufReader::new(reader).lines();
                    writer.write_all(b"hello\n").await.unwrap();
                    for _ in 0..answers_per_connection {
                        let Ok(Some(line)) = lines.next_line().await else {
                            return;
                        };
                        writer.write_all(format!("OK {line}\n").as_bytes()).await.unwrap();
                    }
                });
            }
        });

        (port, accepted)
    }

    #[tokio::test]
    async fn one_shot_request_collects_every_reply_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = tokio::io::BufReader::new(reader).lines();
            writer.write_all(b"hello\n").await.unwrap();
            let _ = lines.next_line().await;
            writer.write_all(b"first\nsecond\nthird\n").await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let config = NodeConfig {
            response_timeout_ms: 1_000,
            ..NodeConfig::default()
        };
        let lines = request(&address, "HELP", &config, Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(lines, ["first", "second", "third"]);
    }

    #[tokio::test]
    async fn reuses_one_connection_per_endpoint() {
        let (port, accepted) = spawn_peer(usize::MAX).await;
        let client = client();

        assert_eq!(client.send_command("127.0.0.1", port, "BC").await, "OK BC");
        assert_eq!(client.send_command("127.0.0.1", port, "BA").await, "OK BA");
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(client.endpoint_count(), 1);
    }

    #[tokio::test]
    async fn reconnects_after_peer_closes() {
        let (port, accepted) = spawn_peer(1).await;
        let client = client();

        assert_eq!(client.send_command("127.0.0.1", port, "BC").await, "OK BC");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.send_command("127.0.0.1", port, "BN").await, "OK BN");
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn silent_peer_times_out_during_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let response = client().send_command("127.0.0.1", port, "BC").await;
        assert_eq!(response, "ER Connection timeout.");
    }

    #[tokio::test]
    async fn peer_closing_without_reply_is_no_response() {
        let (port, _) = spawn_peer(0).await;
        let response = client().send_command("127.0.0.1", port, "BC").await;
        assert_eq!(response, "ER No response.");
    }

    #[tokio::test]
    async fn refused_connection_is_reported_and_forgotten() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = client();
        let response = client.send_command("127.0.0.1", port, "BC").await;
        assert_eq!(response, "ER Connection failed.");
        assert_eq!(client.endpoint_count(), 0);
    }

    #[tokio::test]
    async fn unanswered_command_times_out_and_next_call_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
                let (reader, mut writer) = stream.into_split();
                let mut lines = tokio::io::BufReader::new(reader).lines();
                writer.write_all(b"hello\n").await.unwrap();
                if first {
                    // Greets, reads the command and never answers.
                    let _ = lines.next_line().await;
                    held.push((lines, writer));
                    continue;
                }
                tokio::spawn(async move {
                    while let Ok(Some(line)) = lines.next_line().await {
                        writer.write_all(format!("OK {line}\n").as_bytes()).await.unwrap();
                    }
                });
            }
        });

        let client = client();
        assert_eq!(
            client.send_command("127.0.0.1", port, "BA").await,
            "ER Response timeout."
        );
        assert_eq!(client.send_command("127.0.0.1", port, "BN").await, "OK BN");
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_commands_to_one_peer_take_turns() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let (reader, mut writer) = stream.into_split();
                    let mut lines = tokio::io::BufReader::new(reader).lines();
                    writer.write_all(b"hello\n").await.unwrap();
                    while let Ok(Some(line)) = lines.next_line().await {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        writer.write_all(format!("OK {line}\n").as_bytes()).await.unwrap();
                    }
                });
            }
        });

        let client = PooledClient::new(
            ConfigHandle::new(NodeConfig {
                response_timeout_ms: 1_000,
                ..NodeConfig::default()
            }),
            Arc::new(Translator::builtin()),
        );
        let started = tokio::time::Instant::now();
        let (total, count) = tokio::join!(
            client.send_command("127.0.0.1", port, "BA"),
            client.send_command("127.0.0.1", port, "BN"),
        );

        assert_eq!(total, "OK BA");
        assert_eq!(count, "OK BN");
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }
}
