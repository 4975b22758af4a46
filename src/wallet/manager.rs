//! Wallet manager
//!
//! Wraps a [`WalletStore`] with wallet lookup/creation and the optimistic
//! read-mutate-write loop used for every single-wallet balance change.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

use super::models::{BalanceWrite, Wallet, WalletKey, WalletOwner, WalletType};
use super::store::WalletStore;
use crate::error::{LedgerError, LedgerResult};
use crate::money::Amount;

/// Default bound on compare-and-set attempts per operation
pub const DEFAULT_MAX_CAS_RETRIES: u32 = 16;

pub struct WalletManager {
    store: Arc<dyn WalletStore>,
    max_retries: u32,
}

impl WalletManager {
    pub fn new(store: Arc<dyn WalletStore>) -> Self {
        Self::with_max_retries(store, DEFAULT_MAX_CAS_RETRIES)
    }

    pub fn with_max_retries(store: Arc<dyn WalletStore>, max_retries: u32) -> Self {
        Self {
            store,
            max_retries: max_retries.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn WalletStore> {
        &self.store
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub async fn find_wallet(
        &self,
        owner: &WalletOwner,
        currency: &str,
        wallet_type: WalletType,
    ) -> LedgerResult<Option<Wallet>> {
        self.store
            .find_wallet(&WalletKey::new(owner.id, currency, wallet_type))
            .await
    }

    pub async fn find_wallet_by_id(&self, wallet_id: i64) -> LedgerResult<Option<Wallet>> {
        self.store.find_wallet_by_id(wallet_id).await
    }

    /// Fails with `WalletAlreadyExists` if the (owner, currency, type) key is taken
    pub async fn create_wallet(
        &self,
        owner: &WalletOwner,
        initial: Amount,
        wallet_type: WalletType,
    ) -> LedgerResult<Wallet> {
        let key = WalletKey::new(owner.id, initial.currency(), wallet_type);
        let wallet = self.store.create_wallet(owner, &key, &initial).await?;
        debug!(
            wallet_id = wallet.id,
            owner = %owner.uuid,
            currency = %wallet.currency,
            wallet_type = %wallet_type,
            "Wallet created"
        );
        Ok(wallet)
    }

    /// Find the wallet, creating an empty one if absent
    ///
    /// A concurrent creator winning the race is resolved by re-reading.
    pub async fn find_or_create_wallet(
        &self,
        owner: &WalletOwner,
        currency: &str,
        wallet_type: WalletType,
    ) -> LedgerResult<Wallet> {
        if let Some(wallet) = self.find_wallet(owner, currency, wallet_type).await? {
            return Ok(wallet);
        }
        match self
            .create_wallet(owner, Amount::zero(currency), wallet_type)
            .await
        {
            Err(LedgerError::WalletAlreadyExists) => self
                .find_wallet(owner, currency, wallet_type)
                .await?
                .ok_or(LedgerError::WalletNotFound),
            other => other,
        }
    }

    /// Apply a signed `delta` to one wallet under optimistic concurrency
    ///
    /// Reads the current version, computes the new balance and writes only if
    /// the version is unchanged; on mismatch the whole cycle is retried.
    ///
    /// # Errors
    /// * `CurrencyMismatch` - delta currency differs from the wallet's
    /// * `InsufficientFunds` - result would be negative (no write attempted)
    /// * `Contention` - retries exhausted
    pub async fn mutate_balance(&self, wallet_id: i64, delta: &Amount) -> LedgerResult<Wallet> {
        for attempt in 1..=self.max_retries {
            let wallet = self
                .store
                .find_wallet_by_id(wallet_id)
                .await?
                .ok_or(LedgerError::WalletNotFound)?;

            let new_balance = apply_delta(&wallet, delta)?;
            let write = BalanceWrite {
                wallet_id,
                expected_version: wallet.version,
                new_balance,
            };

            if let Some(updated) = self.store.compare_and_set(&write).await? {
                return Ok(updated);
            }
            debug!(wallet_id, attempt, "Wallet version conflict, retrying");
        }

        warn!(
            wallet_id,
            attempts = self.max_retries,
            "Wallet contention: retries exhausted"
        );
        Err(LedgerError::Contention {
            wallet_id,
            attempts: self.max_retries,
        })
    }
}

/// New balance after `delta`, refusing to go below zero
pub(crate) fn apply_delta(wallet: &Wallet, delta: &Amount) -> LedgerResult<Decimal> {
    if delta.currency() != wallet.currency {
        return Err(LedgerError::CurrencyMismatch {
            expected: wallet.currency.clone(),
            actual: delta.currency().to_string(),
        });
    }
    let new_balance = wallet
        .balance
        .checked_add(delta.value())
        .ok_or_else(|| LedgerError::System("balance overflow".into()))?;
    if new_balance < Decimal::ZERO {
        return Err(LedgerError::InsufficientFunds);
    }
    Ok(new_balance)
}
