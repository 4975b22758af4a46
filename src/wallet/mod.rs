//! Wallet Store
//!
//! Owns the mapping (owner, currency, wallet type) → balance. Every balance
//! change is a versioned compare-and-set; a mismatch retries the whole
//! read-mutate-write cycle up to a bound, then surfaces `Contention`.

pub mod manager;
pub mod memory;
pub mod models;
pub mod owner;
pub mod store;

pub use manager::{DEFAULT_MAX_CAS_RETRIES, WalletManager};
pub use memory::InMemoryWalletStore;
pub use models::{BalanceWrite, Wallet, WalletKey, WalletOwner, WalletType, owner_flags};
pub use owner::WalletOwnerManager;
pub use store::{CommitOutcome, WalletStore};
