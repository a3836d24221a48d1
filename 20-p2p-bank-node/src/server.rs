//! TCP accept loop and per-connection sessions.

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{
    io::{AsyncWrite, BufReader},
    net::{TcpListener, TcpStream},
    select,
    sync::{watch, Semaphore},
    time::timeout,
};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    config::ConfigHandle,
    i18n::Translator,
    pipeline::CommandProcessor,
    session::Session,
    wire::{read_bounded_line, write_line, MAX_COMMAND_BYTES},
};

pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
    stop: watch::Sender<bool>,
}

impl Server {
    pub fn new(
        listener: TcpListener,
        processor: Arc<dyn CommandProcessor>,
        translator: Arc<Translator>,
        config: ConfigHandle,
    ) -> Self {
        let capacity = config.current().max_concurrent_connections;
        let (stop, stopped) = watch::channel(false);
        Self {
            listener,
            state: Arc::new(ServerState {
                processor,
                translator,
                config,
                admission: Arc::new(Semaphore::new(capacity)),
                stopped,
            }),
            stop,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            state,
            stop,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("server shutting down");
                    stop.send_replace(true);
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

struct ServerState {
    processor: Arc<dyn CommandProcessor>,
    translator: Arc<Translator>,
    config: ConfigHandle,
    admission: Arc<Semaphore>,
    stopped: watch::Receiver<bool>,
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<ServerState>,
) {
    match result {
        Ok((stream, peer)) => spawn_client_handler(stream, peer, state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_client_handler(stream: TcpStream, peer: SocketAddr, state: &Arc<ServerState>) {
    let state = Arc::clone(state);
    let span = info_span!("session", %peer, id = %nanoid::nanoid!(8));
    tokio::spawn(
        async move {
            if let Err(err) = handle_connection(stream, peer, state).await {
                warn!(error = ?err, "client connection closed with error");
            }
        }
        .instrument(span),
    );
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
) -> Result<()> {
    let mut stopped = state.stopped.clone();

    // Admitted before any protocol I/O: a waiting client sees no greeting.
    let _permit = select! {
        permit = Arc::clone(&state.admission).acquire_owned() => permit?,
        _ = stopped.wait_for(|stop| *stop) => return Ok(()),
    };

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut session = Session::new(
        peer.ip().to_string(),
        Arc::clone(&state.processor),
        Arc::clone(&state.translator),
    );

    let greeting = state.translator.message("WELCOME_MESSAGE");
    if !deliver(&mut writer, &greeting, state.config.current().client_idle_timeout()).await? {
        return Ok(());
    }
    info!("client connected");

    loop {
        let idle = state.config.current().client_idle_timeout();
        let read = select! {
            _ = stopped.wait_for(|stop| *stop) => {
                debug!("closing session for shutdown");
                break;
            }
            read = timeout(idle, read_bounded_line(&mut reader, MAX_COMMAND_BYTES)) => read,
        };

        let inbound = match read {
            Ok(Ok(Some(inbound))) => inbound,
            Ok(Ok(None)) => break,
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => {
                info!(idle_ms = idle.as_millis() as u64, "closing idle session");
                break;
            }
        };

        let Some(response) = session.handle(inbound).await else {
            break;
        };
        if !deliver(&mut writer, &response, idle).await? {
            break;
        }
    }

    info!("client disconnected");
    Ok(())
}

/// Writes one reply, giving up when the client has not drained its socket
/// within `limit`. Returns whether the reply went out.
async fn deliver<W>(writer: &mut W, line: &str, limit: Duration) -> Result<bool>
where
    W: AsyncWrite + Unpin,
{
    match timeout(limit, write_line(writer, line)).await {
        Ok(written) => {
            written?;
            Ok(true)
        }
        Err(_) => {
            info!(limit_ms = limit.as_millis() as u64, "closing session that stopped reading");
            Ok(false)
        }
    }
}
