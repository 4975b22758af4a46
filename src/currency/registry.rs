//! Currency provider trait and in-memory registry

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::models::Currency;
use crate::error::{LedgerError, LedgerResult};

/// Currency metadata provider
#[async_trait]
pub trait CurrencyProvider: Send + Sync {
    async fn get_currency(&self, symbol: &str) -> LedgerResult<Option<Currency>>;

    /// All currencies, ordered by symbol
    async fn list_currencies(&self) -> LedgerResult<Vec<Currency>>;

    async fn add_currency(&self, currency: Currency) -> LedgerResult<()>;

    async fn set_transitive(&self, symbol: &str, transitive: bool) -> LedgerResult<()>;

    async fn set_active(&self, symbol: &str, active: bool) -> LedgerResult<()>;
}

/// Look up a currency and require it to be active
pub async fn require_active_currency(
    provider: &dyn CurrencyProvider,
    symbol: &str,
) -> LedgerResult<Currency> {
    let currency = provider
        .get_currency(symbol)
        .await?
        .ok_or_else(|| LedgerError::CurrencyNotFound(symbol.to_string()))?;
    if !currency.is_active {
        return Err(LedgerError::CurrencyInactive(symbol.to_string()));
    }
    Ok(currency)
}

/// Symbols are uppercase `[A-Z0-9_]{1,16}`
pub(crate) fn validate_symbol(symbol: &str) -> LedgerResult<()> {
    let valid = !symbol.is_empty()
        && symbol.len() <= 16
        && symbol
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(LedgerError::System(format!("invalid currency symbol: {symbol:?}")))
    }
}

/// In-memory currency registry
#[derive(Default)]
pub struct InMemoryCurrencyRegistry {
    currencies: RwLock<BTreeMap<String, Currency>>,
}

impl InMemoryCurrencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_currencies(currencies: impl IntoIterator<Item = Currency>) -> Self {
        let map = currencies
            .into_iter()
            .map(|c| (c.symbol.clone(), c))
            .collect();
        Self {
            currencies: RwLock::new(map),
        }
    }

    fn update<F>(&self, symbol: &str, f: F) -> LedgerResult<()>
    where
        F: FnOnce(&mut Currency),
    {
        let mut map = self
            .currencies
            .write()
            .map_err(|_| LedgerError::System("currency registry lock poisoned".into()))?;
        let currency = map
            .get_mut(symbol)
            .ok_or_else(|| LedgerError::CurrencyNotFound(symbol.to_string()))?;
        f(currency);
        Ok(())
    }
}

#[async_trait]
impl CurrencyProvider for InMemoryCurrencyRegistry {
    async fn get_currency(&self, symbol: &str) -> LedgerResult<Option<Currency>> {
        let map = self
            .currencies
            .read()
            .map_err(|_| LedgerError::System("currency registry lock poisoned".into()))?;
        Ok(map.get(symbol).cloned())
    }

    async fn list_currencies(&self) -> LedgerResult<Vec<Currency>> {
        let map = self
            .currencies
            .read()
            .map_err(|_| LedgerError::System("currency registry lock poisoned".into()))?;
        Ok(map.values().cloned().collect())
    }

    async fn add_currency(&self, currency: Currency) -> LedgerResult<()> {
        validate_symbol(&currency.symbol)?;
        let mut map = self
            .currencies
            .write()
            .map_err(|_| LedgerError::System("currency registry lock poisoned".into()))?;
        // Additive only: an existing symbol keeps its identity
        if map.contains_key(&currency.symbol) {
            return Err(LedgerError::System(format!(
                "currency already registered: {}",
                currency.symbol
            )));
        }
        tracing::info!(symbol = %currency.symbol, "Currency registered");
        map.insert(currency.symbol.clone(), currency);
        Ok(())
    }

    async fn set_transitive(&self, symbol: &str, transitive: bool) -> LedgerResult<()> {
        self.update(symbol, |c| c.is_transitive = transitive)
    }

    async fn set_active(&self, symbol: &str, active: bool) -> LedgerResult<()> {
        self.update(symbol, |c| c.is_active = active)
    }
}
