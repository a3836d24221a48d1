//! Robbery planning: find the banks on the local /24 and pick which ones to
//! hit.
//!
//! Discovery probes every host of the subnet on this node's port through the
//! [`PeerClient`], with at most `robberyConcurrency` probes in flight. A host
//! counts as a bank only when it answers `BC`, `BA` and `BN` in turn with
//! well-formed replies.
//!
//! Selection is greedy: banks are ranked by balance per client (banks with no
//! clients first) and taken until the loot reaches the target. This is not a
//! minimum-victim subset search.

use std::{cmp::Ordering, net::Ipv4Addr, sync::Arc};

use futures::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::{client::PeerClient, config::ConfigHandle};

const FALLBACK_PREFIX: &str = "127.0.0.";
const HOSTS: std::ops::RangeInclusive<u8> = 1..=254;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankInfo {
    pub address: String,
    pub total_balance: Decimal,
    pub client_count: u64,
}

impl BankInfo {
    /// Balance per client; `None` for a bank without clients, which ranks
    /// above every finite density.
    pub fn density(&self) -> Option<Decimal> {
        if self.client_count == 0 {
            return None;
        }
        self.total_balance.checked_div(Decimal::from(self.client_count))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeistPlan {
    Planned {
        victims: Vec<BankInfo>,
        loot: Decimal,
        clients: u64,
    },
    Unreachable {
        maximum: Decimal,
        banks: usize,
    },
}

/// Greedy selection over the discovered banks.
pub fn plan(mut banks: Vec<BankInfo>, target: Decimal) -> HeistPlan {
    banks.sort_by(|a, b| match (a.density(), b.density()) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => b.cmp(&a),
    });

    let mut loot = Decimal::ZERO;
    let mut clients = 0;
    let mut victims = Vec::new();
    for bank in banks {
        if loot >= target {
            break;
        }
        loot += bank.total_balance;
        clients += bank.client_count;
        victims.push(bank);
    }

    if loot < target {
        return HeistPlan::Unreachable {
            maximum: loot,
            banks: victims.len(),
        };
    }
    HeistPlan::Planned {
        victims,
        loot,
        clients,
    }
}

/// Every host of this node's /24 except the node itself. Addresses that are
/// not IPv4 fall back to the loopback /24.
pub fn candidate_hosts(node_ip: &str) -> Vec<String> {
    let (prefix, own_host) = match node_ip.parse::<Ipv4Addr>() {
        Ok(ip) => {
            let [a, b, c, d] = ip.octets();
            (format!("{a}.{b}.{c}."), Some(d))
        }
        Err(_) => (FALLBACK_PREFIX.to_string(), None),
    };

    HOSTS
        .filter(|host| Some(*host) != own_host)
        .map(|host| format!("{prefix}{host}"))
        .collect()
}

pub struct SubnetScanner {
    client: Arc<dyn PeerClient>,
    config: ConfigHandle,
}

impl SubnetScanner {
    pub fn new(client: Arc<dyn PeerClient>, config: ConfigHandle) -> Self {
        Self { client, config }
    }

    /// Banks that answered, in address order.
    pub async fn scan(&self) -> Vec<BankInfo> {
        let config = self.config.current();
        let hosts = candidate_hosts(&config.node_ip);
        let port = config.port;
        let limiter = Semaphore::new(config.robbery_concurrency);
        info!(
            hosts = hosts.len(),
            port,
            concurrency = config.robbery_concurrency,
            "scanning subnet for banks"
        );

        let probes = hosts.into_iter().map(|host| {
            let limiter = &limiter;
            async move {
                let _permit = limiter.acquire().await.ok()?;
                probe(self.client.as_ref(), host, port).await
            }
        });
        let banks: Vec<BankInfo> = join_all(probes).await.into_iter().flatten().collect();

        info!(banks = banks.len(), "subnet scan finished");
        banks
    }
}

async fn probe(client: &dyn PeerClient, host: String, port: u16) -> Option<BankInfo> {
    let code = client.send_command(&host, port, "BC").await;
    if !code.starts_with("BC") {
        return None;
    }

    let total_balance = client
        .send_command(&host, port, "BA")
        .await
        .strip_prefix("BA")?
        .trim()
        .parse::<Decimal>()
        .ok()?;
    let client_count = client
        .send_command(&host, port, "BN")
        .await
        .strip_prefix("BN")?
        .trim()
        .parse::<u64>()
        .ok()?;

    debug!(%host, %total_balance, client_count, "found bank");
    Some(BankInfo {
        address: host,
        total_balance,
        client_count,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::config::NodeConfig;

    fn bank(address: &str, total: i64, clients: u64) -> BankInfo {
        BankInfo {
            address: address.into(),
            total_balance: Decimal::from(total),
            client_count: clients,
        }
    }

    /// Answers as a bank for the hosts it knows and fails for the rest.
    struct FakeSubnet {
        banks: HashMap<String, (i64, u64)>,
    }

    #[async_trait]
    impl PeerClient for FakeSubnet {
        async fn send_command(&self, ip: &str, _port: u16, command: &str) -> String {
            match (self.banks.get(ip), command) {
                (Some(_), "BC") => format!("BC {ip}"),
                (Some((total, _)), "BA") => format!("BA {total}"),
                (Some((_, clients)), "BN") => format!("BN {clients}"),
                _ => "ER Connection timeout.".to_string(),
            }
        }
    }

    #[test]
    fn denser_banks_are_robbed_first() {
        let banks = vec![bank("10.0.0.2", 600, 2), bank("10.0.0.3", 500, 1)];
        let HeistPlan::Planned {
            victims,
            loot,
            clients,
        } = plan(banks, Decimal::from(1000))
        else {
            panic!("target should be reachable");
        };

        let order: Vec<_> = victims.iter().map(|bank| bank.address.as_str()).collect();
        assert_eq!(order, ["10.0.0.3", "10.0.0.2"]);
        assert_eq!(loot, Decimal::from(1100));
        assert_eq!(clients, 3);
    }

    #[test]
    fn empty_banks_rank_first_and_stop_when_target_met() {
        let banks = vec![
            bank("10.0.0.4", 100, 10),
            bank("10.0.0.5", 50, 0),
            bank("10.0.0.6", 900, 3),
        ];
        let HeistPlan::Planned { victims, loot, .. } = plan(banks, Decimal::from(900)) else {
            panic!("target should be reachable");
        };
        let order: Vec<_> = victims.iter().map(|bank| bank.address.as_str()).collect();
        assert_eq!(order, ["10.0.0.5", "10.0.0.6"]);
        assert_eq!(loot, Decimal::from(950));
    }

    #[test]
    fn shortfall_reports_everything_available() {
        let banks = vec![bank("10.0.0.2", 600, 2), bank("10.0.0.3", 500, 1)];
        assert_eq!(
            plan(banks, Decimal::from(5000)),
            HeistPlan::Unreachable {
                maximum: Decimal::from(1100),
                banks: 2,
            }
        );
        assert_eq!(
            plan(Vec::new(), Decimal::from(1)),
            HeistPlan::Unreachable {
                maximum: Decimal::ZERO,
                banks: 0,
            }
        );
    }

    #[test]
    fn candidates_cover_the_subnet_except_self() {
        let hosts = candidate_hosts("192.168.4.17");
        assert_eq!(hosts.len(), 253);
        assert_eq!(hosts.first().map(String::as_str), Some("192.168.4.1"));
        assert_eq!(hosts.last().map(String::as_str), Some("192.168.4.254"));
        assert!(!hosts.contains(&"192.168.4.17".to_string()));

        let fallback = candidate_hosts("bank.example");
        assert_eq!(fallback.len(), 254);
        assert!(fallback.iter().all(|host| host.starts_with("127.0.0.")));
    }

    #[tokio::test]
    async fn scan_keeps_only_hosts_that_answer_like_banks() {
        let mut banks = HashMap::new();
        banks.insert("10.0.0.2".to_string(), (600, 2));
        banks.insert("10.0.0.3".to_string(), (500, 1));
        let config = ConfigHandle::new(NodeConfig {
            node_ip: "10.0.0.1".into(),
            robbery_concurrency: 4,
            ..NodeConfig::default()
        });

        let scanner = SubnetScanner::new(Arc::new(FakeSubnet { banks }), config);
        let found = scanner.scan().await;
        assert_eq!(found, vec![bank("10.0.0.2", 600, 2), bank("10.0.0.3", 500, 1)]);
    }
}
