//! Local accounts: the record type, its on-disk store, and the service that
//! enforces balance rules.

pub mod account;
pub mod service;
pub mod store;

pub use account::{Account, AccountAddress};
pub use service::AccountService;
pub use store::LedgerStore;
