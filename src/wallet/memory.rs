//! In-memory wallet store
//!
//! Used by tests and by the service binary when no PostgreSQL URL is
//! configured. Reads take a snapshot; writes validate versions under the
//! write lock, so the CAS contract matches the PostgreSQL store.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};

use super::models::{BalanceWrite, Wallet, WalletKey, WalletOwner};
use super::store::{CommitOutcome, WalletStore};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{TransferQuery, TransferRecord};
use crate::money::Amount;

#[derive(Default)]
struct Inner {
    owners: HashMap<String, WalletOwner>,
    wallets: HashMap<i64, Wallet>,
    keys: HashMap<WalletKey, i64>,
    transfers: Vec<TransferRecord>,
    refs: HashMap<String, usize>,
    next_owner_id: i64,
    next_wallet_id: i64,
}

impl Inner {
    fn version_matches(&self, write: &BalanceWrite) -> LedgerResult<bool> {
        let wallet = self
            .wallets
            .get(&write.wallet_id)
            .ok_or(LedgerError::WalletNotFound)?;
        Ok(wallet.version == write.expected_version)
    }

    fn apply(&mut self, write: &BalanceWrite) -> LedgerResult<Wallet> {
        let wallet = self
            .wallets
            .get_mut(&write.wallet_id)
            .ok_or(LedgerError::WalletNotFound)?;
        wallet.balance = write.new_balance;
        wallet.version += 1;
        Ok(wallet.clone())
    }
}

/// In-memory [`WalletStore`]
#[derive(Default)]
pub struct InMemoryWalletStore {
    inner: RwLock<Inner>,
    injected_conflicts: AtomicU32,
}

impl InMemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` balance writes report a version conflict.
    ///
    /// Simulates a concurrent writer winning the race.
    pub fn inject_version_conflicts(&self, n: u32) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn read(&self) -> LedgerResult<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| LedgerError::System("wallet store lock poisoned".into()))
    }

    fn write(&self) -> LedgerResult<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| LedgerError::System("wallet store lock poisoned".into()))
    }
}

#[async_trait]
impl WalletStore for InMemoryWalletStore {
    async fn find_owner(&self, uuid: &str) -> LedgerResult<Option<WalletOwner>> {
        Ok(self.read()?.owners.get(uuid).cloned())
    }

    async fn create_owner(
        &self,
        uuid: &str,
        title: &str,
        level: &str,
        flags: i32,
    ) -> LedgerResult<WalletOwner> {
        let mut inner = self.write()?;
        if inner.owners.contains_key(uuid) {
            return Err(LedgerError::System(format!("wallet owner already exists: {uuid}")));
        }
        inner.next_owner_id += 1;
        let owner = WalletOwner {
            id: inner.next_owner_id,
            uuid: uuid.to_string(),
            title: title.to_string(),
            level: level.to_string(),
            flags,
        };
        inner.owners.insert(uuid.to_string(), owner.clone());
        Ok(owner)
    }

    async fn update_owner_flags(&self, uuid: &str, flags: i32) -> LedgerResult<WalletOwner> {
        let mut inner = self.write()?;
        let owner = inner
            .owners
            .get_mut(uuid)
            .ok_or_else(|| LedgerError::WalletOwnerNotFound(uuid.to_string()))?;
        owner.flags = flags;
        Ok(owner.clone())
    }

    async fn find_wallet(&self, key: &WalletKey) -> LedgerResult<Option<Wallet>> {
        let inner = self.read()?;
        Ok(inner
            .keys
            .get(key)
            .and_then(|id| inner.wallets.get(id))
            .cloned())
    }

    async fn find_wallet_by_id(&self, wallet_id: i64) -> LedgerResult<Option<Wallet>> {
        Ok(self.read()?.wallets.get(&wallet_id).cloned())
    }

    async fn wallets_of(&self, owner_id: i64) -> LedgerResult<Vec<Wallet>> {
        let inner = self.read()?;
        let mut wallets: Vec<Wallet> = inner
            .wallets
            .values()
            .filter(|w| w.owner_id == owner_id)
            .cloned()
            .collect();
        wallets.sort_by_key(|w| w.id);
        Ok(wallets)
    }

    async fn create_wallet(
        &self,
        owner: &WalletOwner,
        key: &WalletKey,
        initial: &Amount,
    ) -> LedgerResult<Wallet> {
        if initial.currency() != key.currency {
            return Err(LedgerError::CurrencyMismatch {
                expected: key.currency.clone(),
                actual: initial.currency().to_string(),
            });
        }
        if initial.value() < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        let mut inner = self.write()?;
        if inner.keys.contains_key(key) {
            return Err(LedgerError::WalletAlreadyExists);
        }
        inner.next_wallet_id += 1;
        let wallet = Wallet {
            id: inner.next_wallet_id,
            owner_id: owner.id,
            owner_uuid: owner.uuid.clone(),
            currency: key.currency.clone(),
            wallet_type: key.wallet_type,
            balance: initial.value(),
            version: 0,
        };
        inner.keys.insert(key.clone(), wallet.id);
        inner.wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    async fn compare_and_set(&self, write: &BalanceWrite) -> LedgerResult<Option<Wallet>> {
        if self.take_injected_conflict() {
            return Ok(None);
        }
        let mut inner = self.write()?;
        if !inner.version_matches(write)? {
            return Ok(None);
        }
        inner.apply(write).map(Some)
    }

    async fn commit_posting(
        &self,
        debit: &BalanceWrite,
        credit: &BalanceWrite,
        record: &TransferRecord,
    ) -> LedgerResult<CommitOutcome> {
        if self.take_injected_conflict() {
            return Ok(CommitOutcome::VersionConflict);
        }
        let mut inner = self.write()?;

        if let Some(existing) = record
            .transfer_ref
            .as_ref()
            .and_then(|r| inner.refs.get(r))
            .map(|&idx| inner.transfers[idx].clone())
        {
            return Ok(CommitOutcome::Duplicate(Box::new(existing)));
        }

        // Validate both before touching either
        if !inner.version_matches(debit)? || !inner.version_matches(credit)? {
            return Ok(CommitOutcome::VersionConflict);
        }

        inner.apply(debit)?;
        inner.apply(credit)?;

        let idx = inner.transfers.len();
        if let Some(r) = &record.transfer_ref {
            inner.refs.insert(r.clone(), idx);
        }
        inner.transfers.push(record.clone());
        Ok(CommitOutcome::Committed)
    }

    async fn find_transfer_by_ref(&self, transfer_ref: &str) -> LedgerResult<Option<TransferRecord>> {
        let inner = self.read()?;
        Ok(inner
            .refs
            .get(transfer_ref)
            .map(|&idx| inner.transfers[idx].clone()))
    }

    async fn query_transfers(&self, query: &TransferQuery) -> LedgerResult<Vec<TransferRecord>> {
        let inner = self.read()?;
        let mut matched: Vec<&TransferRecord> =
            inner.transfers.iter().filter(|r| query.matches(r)).collect();
        matched.sort_by_key(|r| (r.created_at, r.id));
        if !query.page.ascending {
            matched.reverse();
        }
        Ok(matched
            .into_iter()
            .skip(query.page.offset)
            .take(query.page.limit)
            .cloned()
            .collect())
    }
}
