//! Transfer service
//!
//! Owner-uuid level entry points over the [`TransferEngine`]: resolves the
//! sender's existing wallet, lazily creates the receiver's owner and wallet,
//! then posts.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::conversion::GraphService;
use crate::currency::{Currency, CurrencyProvider, require_active_currency};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{TransferCategory, TransferCommand, TransferEngine, TransferQuery, TransferRecord, TransferResult};
use crate::money::Amount;
use crate::wallet::{Wallet, WalletManager, WalletOwner, WalletOwnerManager, WalletType};

/// A same-currency move between two owners
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub symbol: String,
    pub sender_uuid: String,
    #[serde(default)]
    pub sender_wallet_type: WalletType,
    pub receiver_uuid: String,
    #[serde(default)]
    pub receiver_wallet_type: WalletType,
    pub amount: Decimal,
    pub description: Option<String>,
    pub transfer_ref: Option<String>,
    #[serde(default)]
    pub category: TransferCategory,
}

pub struct TransferService {
    engine: Arc<TransferEngine>,
    wallets: Arc<WalletManager>,
    owners: Arc<WalletOwnerManager>,
    currencies: Arc<dyn CurrencyProvider>,
    graph: Arc<GraphService>,
}

impl TransferService {
    pub fn new(
        engine: Arc<TransferEngine>,
        wallets: Arc<WalletManager>,
        owners: Arc<WalletOwnerManager>,
        currencies: Arc<dyn CurrencyProvider>,
        graph: Arc<GraphService>,
    ) -> Self {
        Self {
            engine,
            wallets,
            owners,
            currencies,
            graph,
        }
    }

    pub fn owners(&self) -> &Arc<WalletOwnerManager> {
        &self.owners
    }

    pub fn wallets(&self) -> &Arc<WalletManager> {
        &self.wallets
    }

    pub async fn transfer(&self, req: TransferRequest) -> LedgerResult<TransferResult> {
        if req.sender_wallet_type == WalletType::Cashout
            || req.receiver_wallet_type == WalletType::Cashout
        {
            return Err(LedgerError::InvalidCashoutUsage);
        }

        let currency = require_active_currency(self.currencies.as_ref(), &req.symbol).await?;
        let amount = checked_amount(&currency, req.amount)?;

        let sender = self.owners.require_owner(&req.sender_uuid).await?;
        let source = self.require_wallet(&sender, &currency.symbol, req.sender_wallet_type).await?;

        let receiver = self.owners.find_or_create_owner(&req.receiver_uuid).await?;
        let dest = self
            .wallets
            .find_or_create_wallet(&receiver, &currency.symbol, req.receiver_wallet_type)
            .await?;

        info!(
            amount = %amount,
            sender = %sender.uuid,
            sender_wallet_type = %req.sender_wallet_type,
            receiver = %receiver.uuid,
            receiver_wallet_type = %req.receiver_wallet_type,
            "Transferring funds"
        );

        let cmd = TransferCommand::new(source, dest, amount, req.category)
            .with_description(req.description)
            .with_ref(req.transfer_ref);
        self.engine.transfer(cmd).await
    }

    /// Credit an owner from the system MAIN wallet
    pub async fn deposit(
        &self,
        symbol: &str,
        receiver_uuid: &str,
        receiver_wallet_type: WalletType,
        amount: Decimal,
        description: Option<String>,
        transfer_ref: Option<String>,
    ) -> LedgerResult<TransferResult> {
        if let Some(receiver) = self.owners.find_owner(receiver_uuid).await? {
            if !receiver.can_deposit() {
                return Err(LedgerError::Forbidden);
            }
        }
        self.transfer(TransferRequest {
            symbol: symbol.to_string(),
            sender_uuid: self.owners.system_uuid().to_string(),
            sender_wallet_type: WalletType::Main,
            receiver_uuid: receiver_uuid.to_string(),
            receiver_wallet_type,
            amount,
            description,
            transfer_ref,
            category: TransferCategory::Deposit,
        })
        .await
    }

    /// Operator-initiated MAIN→MAIN credit from an existing owner
    pub async fn deposit_manually(
        &self,
        symbol: &str,
        sender_uuid: &str,
        receiver_uuid: &str,
        amount: Decimal,
        description: Option<String>,
        transfer_ref: Option<String>,
    ) -> LedgerResult<TransferResult> {
        info!(sender = %sender_uuid, receiver = %receiver_uuid, symbol = %symbol, "Manual deposit");
        self.transfer(TransferRequest {
            symbol: symbol.to_string(),
            sender_uuid: sender_uuid.to_string(),
            sender_wallet_type: WalletType::Main,
            receiver_uuid: receiver_uuid.to_string(),
            receiver_wallet_type: WalletType::Main,
            amount,
            description,
            transfer_ref,
            category: TransferCategory::DepositManually,
        })
        .await
    }

    /// `amount * rate` along the first route, truncated to the destination precision
    pub async fn calculate_destination_amount(
        &self,
        symbol: &str,
        amount: Decimal,
        dest_symbol: &str,
    ) -> LedgerResult<Amount> {
        let dest = require_active_currency(self.currencies.as_ref(), dest_symbol).await?;
        let converted = self
            .graph
            .calculate_destination_amount(&Amount::new(symbol, amount), dest_symbol)
            .await?;
        Ok(truncate_to_precision(converted, dest.precision))
    }

    pub async fn history(&self, query: &TransferQuery) -> LedgerResult<Vec<TransferRecord>> {
        self.engine.history(query).await
    }

    pub async fn find_by_ref(&self, transfer_ref: &str) -> LedgerResult<Option<TransferRecord>> {
        self.engine.find_by_ref(transfer_ref).await
    }

    pub fn engine(&self) -> &Arc<TransferEngine> {
        &self.engine
    }

    async fn require_wallet(
        &self,
        owner: &WalletOwner,
        currency: &str,
        wallet_type: WalletType,
    ) -> LedgerResult<Wallet> {
        self.wallets
            .find_wallet(owner, currency, wallet_type)
            .await?
            .ok_or(LedgerError::WalletNotFound)
    }
}

/// Positive and within the currency's precision
pub(crate) fn checked_amount(currency: &Currency, value: Decimal) -> LedgerResult<Amount> {
    if value <= Decimal::ZERO || value.normalize().scale() > currency.precision {
        return Err(LedgerError::InvalidAmount);
    }
    Ok(Amount::new(currency.symbol.clone(), value))
}

pub(crate) fn truncate_to_precision(amount: Amount, precision: u32) -> Amount {
    let value = amount
        .value()
        .round_dp_with_strategy(precision, RoundingStrategy::ToZero);
    Amount::new(amount.currency(), value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::{InMemoryRateStore, Rate};
    use crate::currency::InMemoryCurrencyRegistry;
    use crate::metrics::CountingMetrics;
    use crate::wallet::InMemoryWalletStore;
    use rust_decimal_macros::dec;

    struct Fixture {
        service: TransferService,
        metrics: Arc<CountingMetrics>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryWalletStore::new());
        let metrics = Arc::new(CountingMetrics::new());
        let currencies = Arc::new(InMemoryCurrencyRegistry::with_currencies([
            Currency::new("USDT", "Tether", 6),
            Currency::new("ETH", "Ether", 8),
            Currency::new("Z", "Pivot", 8).transitive(),
        ]));
        let graph = Arc::new(GraphService::new(currencies.clone(), Arc::new(InMemoryRateStore::new())));
        graph.add_rate(Rate::new("ETH", "Z", dec!(100)), false).await.unwrap();
        graph.add_rate(Rate::new("Z", "USDT", dec!(2)), false).await.unwrap();

        let wallets = Arc::new(WalletManager::new(store.clone()));
        let owners = Arc::new(WalletOwnerManager::new(store.clone(), "system"));
        let system = owners.bootstrap_system_owner().await.unwrap();
        wallets
            .create_wallet(&system, Amount::new("USDT", dec!(1000)), WalletType::Main)
            .await
            .unwrap();

        let engine = Arc::new(TransferEngine::new(store, metrics.clone()));
        Fixture {
            service: TransferService::new(engine, wallets, owners, currencies, graph),
            metrics,
        }
    }

    async fn balance(f: &Fixture, uuid: &str, symbol: &str, ty: WalletType) -> Decimal {
        let owner = f.service.owners().require_owner(uuid).await.unwrap();
        f.service
            .wallets()
            .find_wallet(&owner, symbol, ty)
            .await
            .unwrap()
            .map(|w| w.balance)
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_deposit_creates_receiver_lazily() {
        let f = fixture().await;
        let result = f
            .service
            .deposit("USDT", "alice", WalletType::Main, dec!(25), None, Some("chain-tx-1".into()))
            .await
            .unwrap();

        assert_eq!(result.source_uuid, "system");
        assert_eq!(result.received_amount, Amount::new("USDT", dec!(25)));
        assert_eq!(balance(&f, "alice", "USDT", WalletType::Main).await, dec!(25));
        assert_eq!(balance(&f, "system", "USDT", WalletType::Main).await, dec!(975));
        assert_eq!(f.metrics.get("deposit_event"), 1);
    }

    #[tokio::test]
    async fn test_deposit_refused_without_permission() {
        let f = fixture().await;
        f.service.owners().find_or_create_owner("alice").await.unwrap();
        f.service
            .owners()
            .set_permissions("alice", true, true, false)
            .await
            .unwrap();
        assert!(matches!(
            f.service
                .deposit("USDT", "alice", WalletType::Main, dec!(1), None, None)
                .await,
            Err(LedgerError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn test_transfer_requires_sender_wallet() {
        let f = fixture().await;
        let req = TransferRequest {
            symbol: "USDT".into(),
            sender_uuid: "nobody".into(),
            sender_wallet_type: WalletType::Main,
            receiver_uuid: "alice".into(),
            receiver_wallet_type: WalletType::Main,
            amount: dec!(1),
            description: None,
            transfer_ref: None,
            category: TransferCategory::NoCategory,
        };
        assert!(matches!(
            f.service.transfer(req.clone()).await,
            Err(LedgerError::WalletOwnerNotFound(_))
        ));

        f.service.owners().find_or_create_owner("nobody").await.unwrap();
        assert!(matches!(
            f.service.transfer(req).await,
            Err(LedgerError::WalletNotFound)
        ));
    }

    #[tokio::test]
    async fn test_transfer_rejects_cashout_and_excess_precision() {
        let f = fixture().await;
        let mut req = TransferRequest {
            symbol: "USDT".into(),
            sender_uuid: "system".into(),
            sender_wallet_type: WalletType::Main,
            receiver_uuid: "alice".into(),
            receiver_wallet_type: WalletType::Cashout,
            amount: dec!(1),
            description: None,
            transfer_ref: None,
            category: TransferCategory::NoCategory,
        };
        assert!(matches!(
            f.service.transfer(req.clone()).await,
            Err(LedgerError::InvalidCashoutUsage)
        ));

        req.receiver_wallet_type = WalletType::Main;
        req.amount = dec!(0.0000001);
        assert!(matches!(
            f.service.transfer(req).await,
            Err(LedgerError::InvalidAmount)
        ));
    }

    #[tokio::test]
    async fn test_calculate_destination_amount() {
        let f = fixture().await;
        let out = f
            .service
            .calculate_destination_amount("ETH", dec!(10), "USDT")
            .await
            .unwrap();
        assert_eq!(out, Amount::new("USDT", dec!(2000)));

        let truncated = f
            .service
            .calculate_destination_amount("ETH", dec!(0.000000013), "USDT")
            .await
            .unwrap();
        assert_eq!(truncated.value(), dec!(0.000002));
    }

    #[tokio::test]
    async fn test_history_by_owner() {
        let f = fixture().await;
        f.service
            .deposit("USDT", "alice", WalletType::Main, dec!(5), None, None)
            .await
            .unwrap();
        f.service
            .deposit("USDT", "bob", WalletType::Main, dec!(7), None, None)
            .await
            .unwrap();

        let query = TransferQuery {
            owner_uuid: Some("bob".into()),
            ..Default::default()
        };
        let records = f.service.history(&query).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].dest_amount, Amount::new("USDT", dec!(7)));
    }
}
