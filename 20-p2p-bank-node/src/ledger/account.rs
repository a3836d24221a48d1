use std::ops::RangeInclusive;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Account numbers handed out by this node.
pub const ACCOUNT_NUMBER_RANGE: RangeInclusive<u32> = 10_000..=99_999;

/// One ledger record. Persisted as a single JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub account_number: String,
    pub balance: Decimal,
    pub bank_address: String,
}

impl Account {
    pub fn new(account_number: String, bank_address: String) -> Self {
        Self {
            account_number,
            balance: Decimal::ZERO,
            bank_address,
        }
    }

    /// Network-wide identifier, `<number>/<address>`.
    pub fn full_id(&self) -> String {
        format!("{}/{}", self.account_number, self.bank_address)
    }
}

pub fn is_valid_account_number(number: &str) -> bool {
    !number.is_empty() && number.bytes().all(|byte| byte.is_ascii_digit())
}

/// `<number>/<ip>[:<port>]` as typed by a client.
///
/// The address part is kept verbatim: no DNS resolution and no IPv4
/// normalization, so two spellings of one host are two different peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountAddress {
    pub number: String,
    pub ip: String,
    pub port: u16,
}

impl AccountAddress {
    /// Parses an account address, using `default_port` when none is given.
    pub fn parse(raw: &str, default_port: u16) -> Option<Self> {
        let (number, address) = raw.split_once('/')?;
        if address.contains('/') || !is_valid_account_number(number) {
            return None;
        }

        let (ip, port) = match address.split_once(':') {
            Some((ip, port)) => (ip, port.parse::<u16>().ok()?),
            None => (address, default_port),
        };
        if ip.is_empty() {
            return None;
        }

        Some(Self {
            number: number.to_string(),
            ip: ip.to_string(),
            port,
        })
    }
}
