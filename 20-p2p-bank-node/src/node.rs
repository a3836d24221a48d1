//! Wires the ledger, outbound client, dispatcher and pipeline into one
//! listening bank node.

use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use crate::{
    client::{PeerClient, PooledClient},
    config::{ConfigHandle, NodeConfig},
    i18n::Translator,
    ledger::AccountService,
    pipeline::{self, Metrics},
    protocol::{
        strategies::{
            AccountStrategy, BackupStrategy, BankStrategy, HealthStrategy, HelpStrategy,
            LanguageStrategy, RobberyStrategy,
        },
        Dispatcher,
    },
    scanner::SubnetScanner,
    server::Server,
};

pub struct BankNode {
    server: Server,
    config: ConfigHandle,
    client: Arc<PooledClient>,
    local_addr: SocketAddr,
}

impl BankNode {
    /// Binds the listener and loads the ledger. With `port` 0 the bound
    /// ephemeral port becomes the configured one.
    pub async fn bind(config: NodeConfig, translator: Arc<Translator>) -> Result<Self> {
        config.validate()?;
        let mut config = config.with_resolved_ip();

        let listener = TcpListener::bind((config.bind_address.as_str(), config.port))
            .await
            .with_context(|| format!("failed to bind {}:{}", config.bind_address, config.port))?;
        let local_addr = listener.local_addr()?;
        config.port = local_addr.port();

        let ledger = Arc::new(
            AccountService::open(&config.data_file)
                .with_context(|| format!("failed to open ledger {}", config.data_file.display()))?,
        );
        info!(node_ip = %config.node_ip, port = config.port, "bank node configured");

        let config = ConfigHandle::new(config);
        let client = Arc::new(PooledClient::new(config.clone(), Arc::clone(&translator)));
        let peers: Arc<dyn PeerClient> = client.clone();
        let metrics = Arc::new(Metrics::new());

        let dispatcher = Dispatcher::new(Arc::clone(&translator))
            .register(BankStrategy::new(Arc::clone(&ledger), config.clone()))
            .register(AccountStrategy::new(
                Arc::clone(&ledger),
                Arc::clone(&peers),
                config.clone(),
                Arc::clone(&translator),
            ))
            .register(RobberyStrategy::new(
                SubnetScanner::new(peers, config.clone()),
                Arc::clone(&translator),
            ))
            .register(HealthStrategy::new(Arc::clone(&ledger), Arc::clone(&metrics)))
            .register(LanguageStrategy::new(Arc::clone(&translator)))
            .register(BackupStrategy::new(Arc::clone(&ledger), Arc::clone(&translator)))
            .register(HelpStrategy::new(Arc::clone(&translator)));

        let processor = pipeline::compose(
            dispatcher,
            metrics,
            config.clone(),
            Arc::clone(&translator),
        );
        let server = Server::new(listener, processor, translator, config.clone());

        Ok(Self {
            server,
            config,
            client,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> ConfigHandle {
        self.config.clone()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let BankNode { server, client, .. } = self;
        let result = server.run_until(shutdown).await;
        client.close_all();
        result
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        let BankNode { server, client, .. } = self;
        let result = server.run_until_ctrl_c().await;
        client.close_all();
        result
    }
}
