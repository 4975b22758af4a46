//! Service wiring
//!
//! [`Stores`] picks the backend; [`LedgerState`] builds every service on top
//! of it from an [`AppConfig`].

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{AppConfig, ReservationConfig};
use crate::conversion::{GraphService, InMemoryRateStore, RateStore};
use crate::currency::{CurrencyProvider, InMemoryCurrencyRegistry};
use crate::error::LedgerResult;
use crate::ledger::TransferEngine;
use crate::metrics::MetricsSink;
use crate::persistence::{PgCurrencyRegistry, PgRateStore, PgReservationStore, PgWalletStore, PgWithdrawStore};
use crate::reservation::{InMemoryReservationStore, ReservationService, ReservationStore, WorkerConfig};
use crate::transfer::TransferService;
use crate::wallet::{InMemoryWalletStore, WalletManager, WalletOwnerManager, WalletStore};
use crate::withdraw::{InMemoryWithdrawStore, StaticWithdrawPolicies, WithdrawService, WithdrawStore};

/// Storage backends for every service
#[derive(Clone)]
pub struct Stores {
    pub currencies: Arc<dyn CurrencyProvider>,
    pub rates: Arc<dyn RateStore>,
    pub wallets: Arc<dyn WalletStore>,
    pub reservations: Arc<dyn ReservationStore>,
    pub withdraws: Arc<dyn WithdrawStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            currencies: Arc::new(InMemoryCurrencyRegistry::new()),
            rates: Arc::new(InMemoryRateStore::new()),
            wallets: Arc::new(InMemoryWalletStore::new()),
            reservations: Arc::new(InMemoryReservationStore::new()),
            withdraws: Arc::new(InMemoryWithdrawStore::new()),
        }
    }

    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self {
            currencies: Arc::new(PgCurrencyRegistry::new(pool.clone())),
            rates: Arc::new(PgRateStore::new(pool.clone())),
            wallets: Arc::new(PgWalletStore::new(pool.clone())),
            reservations: Arc::new(PgReservationStore::new(pool.clone())),
            withdraws: Arc::new(PgWithdrawStore::new(pool)),
        }
    }
}

/// Shared ledger services
#[derive(Clone)]
pub struct LedgerState {
    pub currencies: Arc<dyn CurrencyProvider>,
    pub graph: Arc<GraphService>,
    pub wallets: Arc<WalletManager>,
    pub owners: Arc<WalletOwnerManager>,
    pub engine: Arc<TransferEngine>,
    pub transfers: Arc<TransferService>,
    pub reservations: Arc<ReservationService>,
    pub withdraws: Arc<WithdrawService>,
    pub policies: Arc<StaticWithdrawPolicies>,
}

impl LedgerState {
    /// Wire services, register configured currencies and create the system owner
    pub async fn build(config: &AppConfig, stores: Stores, metrics: Arc<dyn MetricsSink>) -> LedgerResult<Self> {
        for currency in &config.currencies {
            if stores.currencies.get_currency(&currency.symbol).await?.is_none() {
                stores.currencies.add_currency(currency.clone()).await?;
            }
        }

        let retries = config.ledger.max_cas_retries;
        let wallets = Arc::new(WalletManager::with_max_retries(stores.wallets.clone(), retries));
        let owners = Arc::new(WalletOwnerManager::new(
            stores.wallets.clone(),
            config.ledger.system_uuid.clone(),
        ));
        owners.bootstrap_system_owner().await?;

        let engine = Arc::new(TransferEngine::with_max_retries(stores.wallets.clone(), metrics, retries));
        let graph = Arc::new(GraphService::with_policy(
            stores.currencies.clone(),
            stores.rates.clone(),
            config.conversion.max_hops,
            config.conversion.route_policy,
        ));
        let transfers = Arc::new(TransferService::new(
            engine.clone(),
            wallets.clone(),
            owners.clone(),
            stores.currencies.clone(),
            graph.clone(),
        ));
        let reservations = Arc::new(ReservationService::new(
            stores.reservations.clone(),
            transfers.clone(),
            graph.clone(),
            stores.currencies.clone(),
            config.reservation.ttl_secs,
        ));
        let policies = Arc::new(StaticWithdrawPolicies::from_entries(&config.withdraw_policies));
        let withdraws = Arc::new(WithdrawService::new(
            stores.withdraws.clone(),
            policies.clone(),
            engine.clone(),
            wallets.clone(),
            owners.clone(),
            stores.currencies.clone(),
        ));

        info!(
            currencies = config.currencies.len(),
            withdraw_policies = config.withdraw_policies.len(),
            system_uuid = %config.ledger.system_uuid,
            "Ledger services ready"
        );

        Ok(Self {
            currencies: stores.currencies,
            graph,
            wallets,
            owners,
            engine,
            transfers,
            reservations,
            withdraws,
            policies,
        })
    }
}

impl From<&ReservationConfig> for WorkerConfig {
    fn from(config: &ReservationConfig) -> Self {
        Self {
            scan_interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
            stale_threshold: Duration::from_secs(config.settlement_grace_secs),
            batch_size: config.sweep_batch_size.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::Currency;
    use crate::metrics::CountingMetrics;

    #[tokio::test]
    async fn test_build_registers_currencies_and_system_owner() {
        let mut config = AppConfig::default();
        config.currencies = vec![Currency::new("USDT", "Tether", 6)];
        let stores = Stores::in_memory();

        let state = LedgerState::build(&config, stores.clone(), Arc::new(CountingMetrics::new()))
            .await
            .unwrap();
        assert!(state.currencies.get_currency("USDT").await.unwrap().is_some());
        assert_eq!(state.owners.system_owner().await.unwrap().uuid, config.ledger.system_uuid);

        // A second build over the same stores is a no-op for registration
        LedgerState::build(&config, stores, Arc::new(CountingMetrics::new()))
            .await
            .unwrap();
    }

    #[test]
    fn test_worker_config_from_reservation_config() {
        let config = ReservationConfig {
            sweep_interval_secs: 0,
            sweep_batch_size: 10,
            settlement_grace_secs: 90,
            ..Default::default()
        };
        let worker = WorkerConfig::from(&config);
        assert_eq!(worker.scan_interval, Duration::from_secs(1));
        assert_eq!(worker.stale_threshold, Duration::from_secs(90));
        assert_eq!(worker.batch_size, 10);
    }
}
