//! Wallet store interface
//!
//! The store owns owners, wallets and the posting log. Balance writes are
//! compare-and-set on the wallet version; the caller runs the
//! read-compute-write loop (see [`super::WalletManager`]).

use async_trait::async_trait;

use super::models::{BalanceWrite, Wallet, WalletKey, WalletOwner};
use crate::error::LedgerResult;
use crate::ledger::{TransferQuery, TransferRecord};
use crate::money::Amount;

/// Outcome of an atomic two-wallet posting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Both writes and the record were applied
    Committed,
    /// One of the wallets moved past its expected version; nothing was applied
    VersionConflict,
    /// A record with the same transfer ref already exists; nothing was applied
    Duplicate(Box<TransferRecord>),
}

#[async_trait]
pub trait WalletStore: Send + Sync {
    // === Owners ===

    async fn find_owner(&self, uuid: &str) -> LedgerResult<Option<WalletOwner>>;

    /// Fails if the uuid already has an owner
    async fn create_owner(&self, uuid: &str, title: &str, level: &str, flags: i32)
    -> LedgerResult<WalletOwner>;

    async fn update_owner_flags(&self, uuid: &str, flags: i32) -> LedgerResult<WalletOwner>;

    // === Wallets ===

    async fn find_wallet(&self, key: &WalletKey) -> LedgerResult<Option<Wallet>>;

    async fn find_wallet_by_id(&self, wallet_id: i64) -> LedgerResult<Option<Wallet>>;

    async fn wallets_of(&self, owner_id: i64) -> LedgerResult<Vec<Wallet>>;

    /// Fails with `WalletAlreadyExists` if the key is taken
    async fn create_wallet(&self, owner: &WalletOwner, key: &WalletKey, initial: &Amount)
    -> LedgerResult<Wallet>;

    /// Single-wallet CAS. `Ok(None)` on version mismatch.
    async fn compare_and_set(&self, write: &BalanceWrite) -> LedgerResult<Option<Wallet>>;

    // === Postings ===

    /// Apply both balance writes and append `record` as one unit
    async fn commit_posting(
        &self,
        debit: &BalanceWrite,
        credit: &BalanceWrite,
        record: &TransferRecord,
    ) -> LedgerResult<CommitOutcome>;

    async fn find_transfer_by_ref(&self, transfer_ref: &str) -> LedgerResult<Option<TransferRecord>>;

    async fn query_transfers(&self, query: &TransferQuery) -> LedgerResult<Vec<TransferRecord>>;
}
