use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;

use super::{on_ledger, render_ledger};
use crate::{
    client::PeerClient,
    config::{ConfigHandle, NodeConfig},
    error::LedgerError,
    i18n::Translator,
    ledger::{AccountAddress, AccountService},
    protocol::CommandStrategy,
};

const LOOPBACK_NAMES: &[&str] = &["127.0.0.1", "localhost"];

/// `AC`, `AD`, `AW`, `AB` and `AR`. Commands for accounts owned by another
/// node are relayed to it unchanged.
pub struct AccountStrategy {
    ledger: Arc<AccountService>,
    client: Arc<dyn PeerClient>,
    config: ConfigHandle,
    translator: Arc<Translator>,
}

impl AccountStrategy {
    pub fn new(
        ledger: Arc<AccountService>,
        client: Arc<dyn PeerClient>,
        config: ConfigHandle,
        translator: Arc<Translator>,
    ) -> Self {
        Self {
            ledger,
            client,
            config,
            translator,
        }
    }

    async fn create(&self, config: &NodeConfig) -> anyhow::Result<String> {
        let node_ip = config.node_ip.clone();
        let outcome = on_ledger(&self.ledger, move |ledger| {
            ledger
                .create_account(&node_ip)
                .map(|account| format!("AC {}", account.full_id()))
        })
        .await?;
        render_ledger(&self.translator, outcome)
    }
}

fn apply_locally(
    ledger: &AccountService,
    code: &str,
    number: &str,
    amount: Option<&str>,
) -> Result<String, LedgerError> {
    match (code, amount) {
        ("AD", Some(raw)) => {
            ledger.deposit(number, parse_amount(raw)?)?;
            Ok("AD".to_string())
        }
        ("AW", Some(raw)) => {
            ledger.withdraw(number, parse_amount(raw)?)?;
            Ok("AW".to_string())
        }
        ("AB", _) => Ok(format!("AB {}", ledger.balance(number)?)),
        ("AR", _) => {
            ledger.remove_account(number)?;
            Ok("AR".to_string())
        }
        _ => Err(LedgerError::InvalidArgument {
            key: "INVALID_FORMAT",
            detail: format!("{code} cannot be applied"),
        }),
    }
}

#[async_trait]
impl CommandStrategy for AccountStrategy {
    fn commands(&self) -> &'static [&'static str] {
        &["AC", "AD", "AW", "AB", "AR"]
    }

    async fn execute(&self, args: &[String]) -> anyhow::Result<String> {
        let config = self.config.current();
        let code = args[0].as_str();
        if code == "AC" {
            return self.create(&config).await;
        }

        let takes_amount = matches!(code, "AD" | "AW");
        let expected = if takes_amount { 3 } else { 2 };
        if args.len() < expected {
            return Ok(self.translator.error_line("INVALID_FORMAT"));
        }
        let Some(address) = AccountAddress::parse(&args[1], config.port) else {
            return Ok(self.translator.error_line("INVALID_ACCOUNT_FORMAT"));
        };

        if !is_local(&address, &config) {
            debug!(command = code, peer = %address.ip, port = address.port, "relaying to owning node");
            let line = args.join(" ");
            return Ok(self.client.send_command(&address.ip, address.port, &line).await);
        }

        let code = code.to_string();
        let amount = takes_amount.then(|| args[2].clone());
        let outcome = on_ledger(&self.ledger, move |ledger| {
            apply_locally(ledger, &code, &address.number, amount.as_deref())
        })
        .await?;
        render_ledger(&self.translator, outcome)
    }
}

/// Literal comparison: an address is ours only when it names a loopback
/// alias or our advertised IP, on our own listening port.
pub fn is_local(address: &AccountAddress, config: &NodeConfig) -> bool {
    let ours = LOOPBACK_NAMES.contains(&address.ip.as_str()) || address.ip == config.node_ip;
    ours && address.port == config.port
}

fn parse_amount(raw: &str) -> Result<Decimal, LedgerError> {
    Decimal::from_str(raw).map_err(|_| LedgerError::invalid_amount(raw))
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    const NODE_IP: &str = "203.0.113.5";
    const PORT: u16 = 65525;

    #[derive(Default)]
    struct RecordingPeer {
        sent: Mutex<Vec<(String, u16, String)>>,
    }

    #[async_trait]
    impl PeerClient for RecordingPeer {
        async fn send_command(&self, ip: &str, port: u16, command: &str) -> String {
            self.sent.lock().push((ip.to_string(), port, command.to_string()));
            "AD".to_string()
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        strategy: AccountStrategy,
        peer: Arc<RecordingPeer>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(AccountService::open(dir.path().join("accounts.json")).unwrap());
        let peer = Arc::new(RecordingPeer::default());
        let config = ConfigHandle::new(NodeConfig {
            node_ip: NODE_IP.into(),
            port: PORT,
            ..NodeConfig::default()
        });
        let strategy = AccountStrategy::new(
            ledger,
            Arc::clone(&peer) as Arc<dyn PeerClient>,
            config,
            Arc::new(Translator::builtin()),
        );
        Fixture {
            _dir: dir,
            strategy,
            peer,
        }
    }

    async fn run(strategy: &AccountStrategy, line: &str) -> String {
        let args: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        strategy.execute(&args).await.unwrap()
    }

    #[tokio::test]
    async fn full_account_lifecycle() {
        let Fixture { _dir, strategy, .. } = fixture();

        let created = run(&strategy, "AC").await;
        let id = created.strip_prefix("AC ").unwrap().to_string();
        assert!(id.ends_with(&format!("/{NODE_IP}")));

        assert_eq!(run(&strategy, &format!("AD {id} 500")).await, "AD");
        assert_eq!(run(&strategy, &format!("AB {id}")).await, "AB 500");
        assert_eq!(
            run(&strategy, &format!("AW {id} 600")).await,
            "ER Insufficient funds."
        );
        assert_eq!(
            run(&strategy, &format!("AR {id}")).await,
            "ER Cannot remove account with non-zero balance."
        );
        assert_eq!(run(&strategy, &format!("AW {id} 500")).await, "AW");
        assert_eq!(run(&strategy, &format!("AR {id}")).await, "AR");
        assert_eq!(run(&strategy, &format!("AB {id}")).await, "ER Account not found.");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_deposits_all_land() {
        let Fixture { _dir, strategy, .. } = fixture();
        let strategy = Arc::new(strategy);
        let id = run(&strategy, "AC").await.replace("AC ", "");

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let strategy = Arc::clone(&strategy);
            let line = format!("AD {id} 5");
            tasks.push(tokio::spawn(async move { run(&strategy, &line).await }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), "AD");
        }

        assert_eq!(run(&strategy, &format!("AB {id}")).await, "AB 100");
    }

    #[tokio::test]
    async fn malformed_arguments_are_reported() {
        let Fixture { _dir, strategy, .. } = fixture();
        assert_eq!(run(&strategy, "AD 10001/127.0.0.1").await, "ER Invalid format.");
        assert_eq!(run(&strategy, "AB").await, "ER Invalid format.");
        assert_eq!(run(&strategy, "AB abc/127.0.0.1").await, "ER Invalid account format.");
        assert_eq!(run(&strategy, "AD 10001/127.0.0.1 lots").await, "ER Invalid amount.");

        let id = run(&strategy, "AC").await.replace("AC ", "");
        assert_eq!(
            run(&strategy, &format!("AD {id} -5")).await,
            "ER Amount cannot be negative."
        );
    }

    #[tokio::test]
    async fn loopback_alias_on_own_port_is_local() {
        let Fixture { _dir, strategy, peer } = fixture();
        let id = run(&strategy, "AC").await.replace("AC ", "");
        let number = id.split('/').next().unwrap();

        assert_eq!(run(&strategy, &format!("AD {number}/127.0.0.1 7")).await, "AD");
        assert_eq!(run(&strategy, &format!("AB {number}/localhost:{PORT}")).await, "AB 7");
        assert!(peer.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn foreign_addresses_are_relayed_verbatim() {
        let Fixture { _dir, strategy, peer } = fixture();

        assert_eq!(run(&strategy, "AD 10001/10.0.0.2 25").await, "AD");
        // Same host, different port: another node on this machine.
        run(&strategy, "AD 10001/127.0.0.1:65530 1").await;

        let sent = peer.sent.lock().clone();
        assert_eq!(
            sent,
            vec![
                ("10.0.0.2".to_string(), PORT, "AD 10001/10.0.0.2 25".to_string()),
                ("127.0.0.1".to_string(), 65530, "AD 10001/127.0.0.1:65530 1".to_string()),
            ]
        );
    }

    #[test]
    fn address_locality_is_literal() {
        let config = NodeConfig {
            node_ip: NODE_IP.into(),
            port: PORT,
            ..NodeConfig::default()
        };
        let at = |raw: &str| AccountAddress::parse(raw, PORT).unwrap();

        assert!(is_local(&at("10001/203.0.113.5"), &config));
        assert!(is_local(&at("10001/localhost"), &config));
        assert!(!is_local(&at("10001/203.0.113.5:1"), &config));
        assert!(!is_local(&at("10001/203.000.113.5"), &config));
    }
}
