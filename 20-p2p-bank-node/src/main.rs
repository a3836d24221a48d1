use std::{fs::OpenOptions, path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use p2p_bank_node::{
    cli::{Cli, Command, SendArgs, ServeArgs},
    client,
    config::{watch_config_file, NodeConfig},
    i18n::Translator,
    node::BankNode,
};

/// Console logging, plus an append-only plain-text copy when `log_file` is set.
fn init_tracing(log_file: Option<&Path>) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let opened = log_file.map(|path| OpenOptions::new().create(true).append(true).open(path));
    let (file_layer, failure) = match opened {
        Some(Ok(file)) => (
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Arc::new(file)),
            ),
            None,
        ),
        Some(Err(err)) => (None, Some(err)),
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init();

    if let (Some(path), Some(err)) = (log_file, failure) {
        warn!(path = %path.display(), error = %err, "logging to console only");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::Send(args) => {
            init_tracing(None);
            send(args).await?
        }
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = args.load_config()?;
    init_tracing(config.log_path());

    let translator = Arc::new(Translator::load(&config.languages_dir, &config.language));

    let node = BankNode::bind(config, translator).await?;
    let addr = node.local_addr();
    info!("bank node listening on {}", addr);

    // Keeps reloading for as long as the node runs.
    let _watcher = match &args.config {
        Some(path) => match watch_config_file(path.clone(), node.config()) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "config file will not be reloaded");
                None
            }
        },
        None => None,
    };

    if let Err(err) = node.run_until_ctrl_c().await {
        warn!("bank node exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}

async fn send(args: SendArgs) -> Result<()> {
    let address = args.address();
    let config = NodeConfig::default();
    let lines = client::request(
        &address,
        &args.command_line(),
        &config,
        Duration::from_millis(args.settle_ms),
    )
    .await
    .with_context(|| format!("no reply from {address}"))?;

    for line in lines {
        println!("{line}");
    }
    Ok(())
}
