//! Typed errors shared across the node.
//!
//! Business errors carry a catalog key so that strategies can render them in
//! the active language without matching on every variant.

use std::io;

use rust_decimal::Decimal;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid argument: {detail}")]
    InvalidArgument { key: &'static str, detail: String },

    #[error("account {0} not found")]
    NotFound(String),

    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Decimal, requested: Decimal },

    #[error("account {account} still holds {balance}")]
    NonZeroBalance { account: String, balance: Decimal },

    #[error("no free account numbers left")]
    Exhausted,

    #[error("failed to persist ledger")]
    Persistence(#[source] io::Error),
}

impl LedgerError {
    pub fn negative_amount(amount: Decimal) -> Self {
        LedgerError::InvalidArgument {
            key: "NEGATIVE_AMOUNT",
            detail: format!("amount {amount} is negative"),
        }
    }

    pub fn invalid_amount(raw: &str) -> Self {
        LedgerError::InvalidArgument {
            key: "INVALID_AMOUNT",
            detail: format!("'{raw}' is not a decimal amount"),
        }
    }

    pub fn amount_overflow() -> Self {
        LedgerError::InvalidArgument {
            key: "INVALID_AMOUNT",
            detail: "balance would overflow".to_string(),
        }
    }

    pub fn invalid_snapshot(detail: impl Into<String>) -> Self {
        LedgerError::InvalidArgument {
            key: "INVALID_BACKUP",
            detail: detail.into(),
        }
    }

    /// Catalog key for business-rule violations. Persistence failures have
    /// no key: they surface as internal errors.
    pub fn message_key(&self) -> Option<&'static str> {
        match self {
            LedgerError::InvalidArgument { key, .. } => Some(*key),
            LedgerError::NotFound(_) => Some("ACCOUNT_NOT_FOUND"),
            LedgerError::InsufficientFunds { .. } => Some("INSUFFICIENT_FUNDS"),
            LedgerError::NonZeroBalance { .. } => Some("NONZERO_BALANCE"),
            LedgerError::Exhausted => Some("LEDGER_FULL"),
            LedgerError::Persistence(_) => None,
        }
    }
}

/// Failures of a single outbound exchange.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("timed out waiting for greeting from {0}")]
    HandshakeTimeout(String),

    #[error("timed out waiting for response from {0}")]
    ResponseTimeout(String),

    #[error("{0} closed the connection without replying")]
    NoResponse(String),

    #[error("communication with {endpoint} failed")]
    ConnectionFailed {
        endpoint: String,
        #[source]
        source: io::Error,
    },
}

impl ClientError {
    pub fn message_key(&self) -> &'static str {
        match self {
            ClientError::ConnectTimeout(_) | ClientError::HandshakeTimeout(_) => {
                "CONNECTION_TIMEOUT"
            }
            ClientError::ResponseTimeout(_) => "RESPONSE_TIMEOUT",
            ClientError::NoResponse(_) => "NO_RESPONSE",
            ClientError::ConnectionFailed { .. } => "CONNECTION_FAILED",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
