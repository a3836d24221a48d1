use std::path::PathBuf;

use clap::{builder::TypedValueParser, Args, Parser, Subcommand};

use crate::{
    config::{NodeConfig, DEFAULT_PORT},
    error::ConfigError,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a bank node.
    Serve(ServeArgs),
    /// Send one command to a running node and print its reply.
    Send(SendArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// JSON configuration file. It is watched and reloaded on change.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Interface to listen on.
    #[arg(long)]
    pub bind: Option<String>,

    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Address advertised to clients and peers.
    #[arg(long)]
    pub node_ip: Option<String>,

    /// Ledger file.
    #[arg(long)]
    pub data_file: Option<PathBuf>,

    /// Initial language code.
    #[arg(long)]
    pub language: Option<String>,

    /// File that receives a copy of the log. Pass an empty value to disable.
    #[arg(long, value_parser = clap::builder::OsStringValueParser::new().map(PathBuf::from))]
    pub log_file: Option<PathBuf>,
}

impl ServeArgs {
    /// The config file (or defaults) with command-line overrides applied.
    pub fn load_config(&self) -> Result<NodeConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_file(path)?,
            None => NodeConfig::default(),
        };

        if let Some(bind) = &self.bind {
            config.bind_address = bind.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(node_ip) = &self.node_ip {
            config.node_ip = node_ip.clone();
        }
        if let Some(data_file) = &self.data_file {
            config.data_file = data_file.clone();
        }
        if let Some(language) = &self.language {
            config.language = language.clone();
        }
        if let Some(log_file) = &self.log_file {
            config.log_file = log_file.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    /// Node to contact.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Milliseconds of silence that end a multi-line reply.
    #[arg(long, default_value_t = 300)]
    pub settle_ms: u64,

    /// Command line to send, e.g. `AB 10001/10.0.0.5`.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl SendArgs {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "port": 7000, "language": "cs", "rateLimitPerMinute": 5 }}"#).unwrap();

        let cli = Cli::parse_from([
            "p2p-bank-node",
            "serve",
            "--config",
            file.path().to_str().unwrap(),
            "--port",
            "0",
            "--node-ip",
            "10.1.2.3",
            "--log-file",
            "",
        ]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };

        let config = args.load_config().unwrap();
        assert_eq!(config.port, 0);
        assert_eq!(config.node_ip, "10.1.2.3");
        assert_eq!(config.language, "cs");
        assert_eq!(config.rate_limit_per_minute, 5);
        assert_eq!(config.log_path(), None);
    }

    #[test]
    fn send_joins_trailing_words() {
        let cli = Cli::parse_from(["p2p-bank-node", "send", "--port", "7000", "AD", "10001/10.0.0.5", "-3"]);
        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.address(), "127.0.0.1:7000");
        assert_eq!(args.command_line(), "AD 10001/10.0.0.5 -3");
    }
}
