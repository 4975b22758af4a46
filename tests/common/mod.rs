//! Shared setup for the integration tests

use std::sync::Arc;

use custody_ledger::config::AppConfig;
use custody_ledger::conversion::Rate;
use custody_ledger::currency::Currency;
use custody_ledger::metrics::CountingMetrics;
use custody_ledger::withdraw::WithdrawPolicyEntry;
use custody_ledger::{Amount, LedgerState, Stores, WalletType};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub const SYSTEM_UUID: &str = "system";

pub fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.ledger.system_uuid = SYSTEM_UUID.to_string();
    config.ledger.max_cas_retries = 256;
    config.currencies = vec![
        Currency::new("ETH", "Ether", 10),
        Currency::new("USDT", "Tether", 2),
        Currency::new("Z", "Pivot", 2).transitive(),
    ];
    config.withdraw_policies = vec![WithdrawPolicyEntry {
        symbol: "USDT".into(),
        network: "TRON".into(),
        enabled: true,
        fee: dec!(1),
        minimum: dec!(5),
    }];
    config
}

/// ETH →(100)→ Z →(2)→ USDT, system MAIN wallets funded
pub async fn ledger(system_usdt: Decimal) -> (LedgerState, Arc<CountingMetrics>) {
    let metrics = Arc::new(CountingMetrics::new());
    let state = LedgerState::build(&config(), Stores::in_memory(), metrics.clone())
        .await
        .unwrap();
    state.graph.add_rate(Rate::new("ETH", "Z", dec!(100)), false).await.unwrap();
    state.graph.add_rate(Rate::new("Z", "USDT", dec!(2)), false).await.unwrap();

    let system = state.owners.system_owner().await.unwrap();
    state
        .wallets
        .create_wallet(&system, Amount::new("USDT", system_usdt), WalletType::Main)
        .await
        .unwrap();
    state
        .wallets
        .create_wallet(&system, Amount::new("ETH", dec!(1000)), WalletType::Main)
        .await
        .unwrap();
    (state, metrics)
}

pub async fn balance(state: &LedgerState, uuid: &str, symbol: &str, wallet_type: WalletType) -> Decimal {
    let Some(owner) = state.owners.find_owner(uuid).await.unwrap() else {
        return Decimal::ZERO;
    };
    state
        .wallets
        .find_wallet(&owner, symbol, wallet_type)
        .await
        .unwrap()
        .map(|w| w.balance)
        .unwrap_or(Decimal::ZERO)
}
