//! A node of a peer-to-peer banking network.
//!
//! See `README.md` for usage and the line protocol. Each module focuses on a
//! concrete responsibility:
//!
//! - [`server`] accepts TCP connections, bounds how many are served at once,
//!   and runs a [`session`] per connection.
//! - [`pipeline`] wraps command handling in metrics, rate limiting and
//!   request logging.
//! - [`protocol`] dispatches each command code to its strategy.
//! - [`ledger`] owns the local accounts and their on-disk file.
//! - [`client`] talks to other nodes over pooled connections, both for
//!   relaying account commands and for the [`scanner`].
//! - [`node`] wires everything into one runnable node; [`cli`] parses the
//!   command line for the binary.
//!
//! Integration tests under `tests/` start real nodes on loopback ports and
//! speak the protocol over TCP.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod i18n;
pub mod ledger;
pub mod node;
pub mod pipeline;
pub mod protocol;
pub mod scanner;
pub mod server;
pub mod session;
pub mod wire;
