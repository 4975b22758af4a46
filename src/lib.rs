//! Custody Ledger - multi-currency custodial ledger
//!
//! Versioned wallets with atomic double-entry postings, rate-graph currency
//! conversion, time-limited reservations and staged withdrawal custody.
//!
//! # Modules
//!
//! - [`currency`] - Currency registry
//! - [`wallet`] - Wallet store with optimistic versioning
//! - [`conversion`] - Rate graph and route search
//! - [`ledger`] - Transfer engine (atomic postings, CASHOUT capability)
//! - [`transfer`] - Owner-level transfer, deposit and conversion
//! - [`reservation`] - Reserve-then-advance protocol and its workers
//! - [`withdraw`] - Withdrawal state machine
//! - [`persistence`] - PostgreSQL-backed stores
//! - [`state`] - Service wiring

// Core types - must be first!
pub mod error;
pub mod money;

pub mod config;
pub mod db;
pub mod logging;
pub mod metrics;

pub mod conversion;
pub mod currency;
pub mod ledger;
pub mod reservation;
pub mod transfer;
pub mod wallet;
pub mod withdraw;

pub mod persistence;
pub mod state;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use ledger::{TransferCategory, TransferCommand, TransferEngine, TransferId, TransferRecord, TransferResult};
pub use money::Amount;
pub use state::{LedgerState, Stores};
pub use wallet::{Wallet, WalletType};
