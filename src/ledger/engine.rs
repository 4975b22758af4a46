//! Transfer Engine
//!
//! The only writer of wallet balances. One call = one posting: debit source,
//! credit destination and append the record, all through a single
//! [`WalletStore::commit_posting`] so no partial state survives a failure.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::{TransferCommand, TransferId, TransferQuery, TransferRecord, TransferResult};
use crate::error::{LedgerError, LedgerResult};
use crate::metrics::MetricsSink;
use crate::money::Amount;
use crate::wallet::manager::apply_delta;
use crate::wallet::{BalanceWrite, CommitOutcome, DEFAULT_MAX_CAS_RETRIES, Wallet, WalletStore};

/// Capability to post against CASHOUT wallets
///
/// Only constructible inside the crate; the withdrawal service holds one.
#[derive(Debug)]
pub struct CustodyAccess(());

impl CustodyAccess {
    pub(crate) fn grant() -> Self {
        Self(())
    }
}

pub struct TransferEngine {
    store: Arc<dyn WalletStore>,
    metrics: Arc<dyn MetricsSink>,
    max_retries: u32,
}

impl TransferEngine {
    pub fn new(store: Arc<dyn WalletStore>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self::with_max_retries(store, metrics, DEFAULT_MAX_CAS_RETRIES)
    }

    pub fn with_max_retries(
        store: Arc<dyn WalletStore>,
        metrics: Arc<dyn MetricsSink>,
        max_retries: u32,
    ) -> Self {
        Self {
            store,
            metrics,
            max_retries: max_retries.max(1),
        }
    }

    /// Post a transfer between two generic wallets
    ///
    /// # Errors
    /// * `InvalidCashoutUsage` - either endpoint is a CASHOUT wallet
    /// * `InvalidAmount` / `CurrencyMismatch` / `SameWallet` - bad command
    /// * `InsufficientFunds` - source would go negative
    /// * `Contention` - version retries exhausted
    pub async fn transfer(&self, cmd: TransferCommand) -> LedgerResult<TransferResult> {
        self.post(cmd, false).await
    }

    /// Post a transfer that may touch CASHOUT wallets
    pub async fn custody_transfer(
        &self,
        cmd: TransferCommand,
        _access: &CustodyAccess,
    ) -> LedgerResult<TransferResult> {
        self.post(cmd, true).await
    }

    pub async fn find_by_ref(&self, transfer_ref: &str) -> LedgerResult<Option<TransferRecord>> {
        self.store.find_transfer_by_ref(transfer_ref).await
    }

    pub async fn history(&self, query: &TransferQuery) -> LedgerResult<Vec<TransferRecord>> {
        self.store.query_transfers(query).await
    }

    async fn post(&self, cmd: TransferCommand, custody: bool) -> LedgerResult<TransferResult> {
        validate(&cmd)?;
        if !custody {
            ensure_generic_endpoints(&cmd.source, &cmd.dest)?;
        }

        if let Some(transfer_ref) = &cmd.transfer_ref {
            if let Some(existing) = self.store.find_transfer_by_ref(transfer_ref).await? {
                ensure_same_posting(&existing, &cmd)?;
                info!(transfer_ref = %transfer_ref, transfer_id = %existing.id, "Duplicate transfer ref, returning existing posting");
                return Ok(TransferResult::from(&existing));
            }
        }

        let debit_delta = Amount::new(cmd.source_amount.currency(), -cmd.source_amount.value());

        for attempt in 1..=self.max_retries {
            let source = self.load(cmd.source.id).await?;
            let dest = self.load(cmd.dest.id).await?;
            if !custody {
                // Stored type is authoritative over the command's copy
                ensure_generic_endpoints(&source, &dest)?;
            }

            let source_after = apply_delta(&source, &debit_delta)?;
            let dest_after = apply_delta(&dest, &cmd.dest_amount)?;

            let record = TransferRecord {
                id: TransferId::new(),
                source_wallet_id: source.id,
                source_owner_uuid: source.owner_uuid.clone(),
                source_wallet_type: source.wallet_type,
                dest_wallet_id: dest.id,
                dest_owner_uuid: dest.owner_uuid.clone(),
                dest_wallet_type: dest.wallet_type,
                source_amount: cmd.source_amount.clone(),
                dest_amount: cmd.dest_amount.clone(),
                source_balance_before: source.balance,
                source_balance_after: source_after,
                dest_balance_before: dest.balance,
                dest_balance_after: dest_after,
                description: cmd.description.clone(),
                transfer_ref: cmd.transfer_ref.clone(),
                category: cmd.category,
                created_at: Utc::now(),
            };
            let debit = BalanceWrite {
                wallet_id: source.id,
                expected_version: source.version,
                new_balance: source_after,
            };
            let credit = BalanceWrite {
                wallet_id: dest.id,
                expected_version: dest.version,
                new_balance: dest_after,
            };

            match self.store.commit_posting(&debit, &credit, &record).await? {
                CommitOutcome::Committed => {
                    self.metrics.increment(cmd.category.metric_name());
                    info!(
                        transfer_id = %record.id,
                        category = %record.category,
                        source_wallet = source.id,
                        dest_wallet = dest.id,
                        amount = %record.source_amount,
                        received = %record.dest_amount,
                        "Posting committed"
                    );
                    return Ok(TransferResult::from(&record));
                }
                CommitOutcome::Duplicate(existing) => {
                    ensure_same_posting(&existing, &cmd)?;
                    info!(transfer_id = %existing.id, "Concurrent posting with same ref won");
                    return Ok(TransferResult::from(existing.as_ref()));
                }
                CommitOutcome::VersionConflict => {
                    debug!(
                        source_wallet = source.id,
                        dest_wallet = dest.id,
                        attempt,
                        "Posting version conflict, retrying"
                    );
                }
            }
        }

        warn!(
            source_wallet = cmd.source.id,
            dest_wallet = cmd.dest.id,
            attempts = self.max_retries,
            "Posting contention: retries exhausted"
        );
        Err(LedgerError::Contention {
            wallet_id: cmd.source.id,
            attempts: self.max_retries,
        })
    }

    async fn load(&self, wallet_id: i64) -> LedgerResult<Wallet> {
        self.store
            .find_wallet_by_id(wallet_id)
            .await?
            .ok_or(LedgerError::WalletNotFound)
    }
}

fn ensure_generic_endpoints(source: &Wallet, dest: &Wallet) -> LedgerResult<()> {
    if source.wallet_type.is_generic_endpoint() && dest.wallet_type.is_generic_endpoint() {
        return Ok(());
    }
    warn!(
        source_wallet = source.id,
        dest_wallet = dest.id,
        "Rejected generic transfer touching a cashout wallet"
    );
    Err(LedgerError::InvalidCashoutUsage)
}

/// A reused ref must name the same movement it was first posted with
fn ensure_same_posting(existing: &TransferRecord, cmd: &TransferCommand) -> LedgerResult<()> {
    let same = existing.source_wallet_id == cmd.source.id
        && existing.dest_wallet_id == cmd.dest.id
        && existing.source_amount == cmd.source_amount
        && existing.dest_amount == cmd.dest_amount
        && existing.category == cmd.category;
    if same {
        return Ok(());
    }
    let transfer_ref = existing.transfer_ref.clone().unwrap_or_default();
    warn!(
        transfer_ref = %transfer_ref,
        transfer_id = %existing.id,
        source_wallet = cmd.source.id,
        dest_wallet = cmd.dest.id,
        "Transfer ref reused for a different posting"
    );
    Err(LedgerError::DuplicateTransferRef(transfer_ref))
}

fn validate(cmd: &TransferCommand) -> LedgerResult<()> {
    if !cmd.source_amount.is_positive() || !cmd.dest_amount.is_positive() {
        return Err(LedgerError::InvalidAmount);
    }
    if cmd.source.id == cmd.dest.id {
        return Err(LedgerError::SameWallet);
    }
    if cmd.source_amount.currency() != cmd.source.currency {
        return Err(LedgerError::CurrencyMismatch {
            expected: cmd.source.currency.clone(),
            actual: cmd.source_amount.currency().to_string(),
        });
    }
    if cmd.dest_amount.currency() != cmd.dest.currency {
        return Err(LedgerError::CurrencyMismatch {
            expected: cmd.dest.currency.clone(),
            actual: cmd.dest_amount.currency().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TransferCategory;
    use crate::metrics::CountingMetrics;
    use crate::wallet::{InMemoryWalletStore, WalletKey, WalletType, owner_flags};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Fixture {
        store: Arc<InMemoryWalletStore>,
        metrics: Arc<CountingMetrics>,
        engine: TransferEngine,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(InMemoryWalletStore::new());
            let metrics = Arc::new(CountingMetrics::new());
            let engine = TransferEngine::with_max_retries(store.clone(), metrics.clone(), 4);
            Self {
                store,
                metrics,
                engine,
            }
        }

        async fn wallet(&self, uuid: &str, currency: &str, ty: WalletType, balance: Decimal) -> Wallet {
            let owner = match self.store.find_owner(uuid).await.unwrap() {
                Some(o) => o,
                None => self
                    .store
                    .create_owner(uuid, uuid, "1", owner_flags::DEFAULT)
                    .await
                    .unwrap(),
            };
            self.store
                .create_wallet(
                    &owner,
                    &WalletKey::new(owner.id, currency, ty),
                    &Amount::new(currency, balance),
                )
                .await
                .unwrap()
        }

        async fn balance(&self, wallet: &Wallet) -> Decimal {
            self.store
                .find_wallet_by_id(wallet.id)
                .await
                .unwrap()
                .unwrap()
                .balance
        }
    }

    #[tokio::test]
    async fn test_transfer_moves_balance_and_records_posting() {
        let f = Fixture::new();
        let a = f.wallet("alice", "USDT", WalletType::Main, dec!(100)).await;
        let b = f.wallet("bob", "USDT", WalletType::Main, dec!(5)).await;

        let cmd = TransferCommand::new(a.clone(), b.clone(), Amount::new("USDT", dec!(30.5)), TransferCategory::Trade)
            .with_ref(Some("t-1".into()));
        let result = f.engine.transfer(cmd).await.unwrap();

        assert_eq!(result.source_balance_before, dec!(100));
        assert_eq!(result.source_balance_after, dec!(69.5));
        assert_eq!(f.balance(&a).await, dec!(69.5));
        assert_eq!(f.balance(&b).await, dec!(35.5));
        assert_eq!(f.metrics.get("trade_event"), 1);

        let record = f.engine.find_by_ref("t-1").await.unwrap().unwrap();
        assert_eq!(record.dest_balance_after, dec!(35.5));
    }

    #[tokio::test]
    async fn test_transfer_rejects_cashout_endpoint() {
        let f = Fixture::new();
        let main = f.wallet("alice", "USDT", WalletType::Main, dec!(100)).await;
        let cashout = f.wallet("alice", "USDT", WalletType::Cashout, dec!(0)).await;

        let cmd = TransferCommand::new(main.clone(), cashout.clone(), Amount::new("USDT", dec!(1)), TransferCategory::NoCategory);
        assert!(matches!(
            f.engine.transfer(cmd.clone()).await,
            Err(LedgerError::InvalidCashoutUsage)
        ));
        assert_eq!(f.balance(&main).await, dec!(100));

        // Custody path may touch it
        f.engine
            .custody_transfer(cmd, &CustodyAccess::grant())
            .await
            .unwrap();
        assert_eq!(f.balance(&cashout).await, dec!(1));
    }

    #[tokio::test]
    async fn test_overdraw_leaves_both_wallets_unchanged() {
        let f = Fixture::new();
        let a = f.wallet("alice", "USDT", WalletType::Main, dec!(10)).await;
        let b = f.wallet("bob", "USDT", WalletType::Main, dec!(0)).await;

        let cmd = TransferCommand::new(a.clone(), b.clone(), Amount::new("USDT", dec!(10.01)), TransferCategory::NoCategory);
        assert!(matches!(
            f.engine.transfer(cmd).await,
            Err(LedgerError::InsufficientFunds)
        ));
        assert_eq!(f.balance(&a).await, dec!(10));
        assert_eq!(f.balance(&b).await, dec!(0));
        assert!(f.engine.history(&TransferQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_currency_and_amount_validation() {
        let f = Fixture::new();
        let a = f.wallet("alice", "USDT", WalletType::Main, dec!(10)).await;
        let b = f.wallet("bob", "BTC", WalletType::Main, dec!(0)).await;

        let mismatch = TransferCommand::new(a.clone(), b.clone(), Amount::new("USDT", dec!(1)), TransferCategory::NoCategory);
        assert!(matches!(
            f.engine.transfer(mismatch).await,
            Err(LedgerError::CurrencyMismatch { .. })
        ));

        let zero = TransferCommand::new(a.clone(), b.clone(), Amount::new("USDT", dec!(0)), TransferCategory::NoCategory)
            .with_dest_amount(Amount::new("BTC", dec!(0)));
        assert!(matches!(f.engine.transfer(zero).await, Err(LedgerError::InvalidAmount)));

        let same = TransferCommand::new(a.clone(), a.clone(), Amount::new("USDT", dec!(1)), TransferCategory::NoCategory);
        assert!(matches!(f.engine.transfer(same).await, Err(LedgerError::SameWallet)));
    }

    #[tokio::test]
    async fn test_cross_currency_posting() {
        let f = Fixture::new();
        let a = f.wallet("alice", "ETH", WalletType::Main, dec!(10)).await;
        let b = f.wallet("bob", "USDT", WalletType::Main, dec!(0)).await;

        let cmd = TransferCommand::new(a.clone(), b.clone(), Amount::new("ETH", dec!(1)), TransferCategory::NoCategory)
            .with_dest_amount(Amount::new("USDT", dec!(200)));
        let result = f.engine.transfer(cmd).await.unwrap();
        assert_eq!(result.received_amount, Amount::new("USDT", dec!(200)));
        assert_eq!(f.balance(&a).await, dec!(9));
        assert_eq!(f.balance(&b).await, dec!(200));
    }

    #[tokio::test]
    async fn test_duplicate_ref_returns_existing_posting() {
        let f = Fixture::new();
        let a = f.wallet("alice", "USDT", WalletType::Main, dec!(100)).await;
        let b = f.wallet("bob", "USDT", WalletType::Main, dec!(0)).await;

        let cmd = TransferCommand::new(a.clone(), b.clone(), Amount::new("USDT", dec!(10)), TransferCategory::Deposit)
            .with_ref(Some("dep-1".into()));
        let first = f.engine.transfer(cmd.clone()).await.unwrap();
        let second = f.engine.transfer(cmd).await.unwrap();

        assert_eq!(first.transfer_id, second.transfer_id);
        assert_eq!(f.balance(&a).await, dec!(90));
        assert_eq!(f.metrics.get("deposit_event"), 1);
    }

    #[tokio::test]
    async fn test_reused_ref_with_different_payload_is_rejected() {
        let f = Fixture::new();
        let system = f.wallet("system", "USDT", WalletType::Main, dec!(100)).await;
        let alice = f.wallet("alice", "USDT", WalletType::Main, dec!(0)).await;
        let bob = f.wallet("bob", "USDT", WalletType::Main, dec!(0)).await;

        let first = TransferCommand::new(system.clone(), alice.clone(), Amount::new("USDT", dec!(10)), TransferCategory::Deposit)
            .with_ref(Some("dep-1".into()));
        f.engine.transfer(first).await.unwrap();

        let other_receiver = TransferCommand::new(system.clone(), bob.clone(), Amount::new("USDT", dec!(10)), TransferCategory::Deposit)
            .with_ref(Some("dep-1".into()));
        assert!(matches!(
            f.engine.transfer(other_receiver).await,
            Err(LedgerError::DuplicateTransferRef(ref r)) if r == "dep-1"
        ));

        let other_amount = TransferCommand::new(system.clone(), alice.clone(), Amount::new("USDT", dec!(11)), TransferCategory::Deposit)
            .with_ref(Some("dep-1".into()));
        assert!(matches!(
            f.engine.transfer(other_amount).await,
            Err(LedgerError::DuplicateTransferRef(_))
        ));

        let other_category = TransferCommand::new(system.clone(), alice.clone(), Amount::new("USDT", dec!(10)), TransferCategory::NoCategory)
            .with_ref(Some("dep-1".into()));
        assert!(matches!(
            f.engine.transfer(other_category).await,
            Err(LedgerError::DuplicateTransferRef(_))
        ));

        assert_eq!(f.balance(&system).await, dec!(90));
        assert_eq!(f.balance(&alice).await, dec!(10));
        assert_eq!(f.balance(&bob).await, dec!(0));
    }

    #[tokio::test]
    async fn test_contention_exhausted_applies_nothing() {
        let f = Fixture::new();
        let a = f.wallet("alice", "USDT", WalletType::Main, dec!(100)).await;
        let b = f.wallet("bob", "USDT", WalletType::Main, dec!(0)).await;

        f.store.inject_version_conflicts(4);
        let cmd = TransferCommand::new(a.clone(), b.clone(), Amount::new("USDT", dec!(10)), TransferCategory::NoCategory);
        let err = f.engine.transfer(cmd).await.unwrap_err();
        assert!(matches!(err, LedgerError::Contention { attempts: 4, .. }));
        assert_eq!(f.balance(&a).await, dec!(100));
        assert_eq!(f.balance(&b).await, dec!(0));
    }
}
