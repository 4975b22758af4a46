//! Rate and forbidden-pair storage

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use super::models::{ForbiddenPair, Rate};
use crate::error::{LedgerError, LedgerResult};

#[async_trait]
pub trait RateStore: Send + Sync {
    /// All rates ordered by (source, dest)
    async fn list_rates(&self) -> LedgerResult<Vec<Rate>>;

    async fn get_rate(&self, source_symbol: &str, dest_symbol: &str) -> LedgerResult<Option<Rate>>;

    /// Insert; `RateAlreadyExists` when present unless `ignore_if_exists`
    async fn add_rate(&self, rate: &Rate, ignore_if_exists: bool) -> LedgerResult<()>;

    /// Replace an existing rate; `RateNotFound` when absent
    async fn update_rate(&self, rate: &Rate) -> LedgerResult<()>;

    async fn delete_rate(&self, source_symbol: &str, dest_symbol: &str) -> LedgerResult<()>;

    async fn list_forbidden_pairs(&self) -> LedgerResult<Vec<ForbiddenPair>>;

    /// Idempotent
    async fn add_forbidden_pair(&self, pair: &ForbiddenPair) -> LedgerResult<()>;

    /// Idempotent
    async fn delete_forbidden_pair(&self, pair: &ForbiddenPair) -> LedgerResult<()>;
}

#[derive(Default)]
struct Tables {
    rates: BTreeMap<(String, String), Decimal>,
    forbidden: BTreeSet<ForbiddenPair>,
}

/// In-memory [`RateStore`]
#[derive(Default)]
pub struct InMemoryRateStore {
    tables: RwLock<Tables>,
}

impl InMemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> LedgerResult<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| LedgerError::System("rate store lock poisoned".into()))
    }

    fn write(&self) -> LedgerResult<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| LedgerError::System("rate store lock poisoned".into()))
    }
}

fn key(source_symbol: &str, dest_symbol: &str) -> (String, String) {
    (source_symbol.to_string(), dest_symbol.to_string())
}

#[async_trait]
impl RateStore for InMemoryRateStore {
    async fn list_rates(&self) -> LedgerResult<Vec<Rate>> {
        Ok(self
            .read()?
            .rates
            .iter()
            .map(|((s, d), r)| Rate::new(s.clone(), d.clone(), *r))
            .collect())
    }

    async fn get_rate(&self, source_symbol: &str, dest_symbol: &str) -> LedgerResult<Option<Rate>> {
        Ok(self
            .read()?
            .rates
            .get(&key(source_symbol, dest_symbol))
            .map(|r| Rate::new(source_symbol, dest_symbol, *r)))
    }

    async fn add_rate(&self, rate: &Rate, ignore_if_exists: bool) -> LedgerResult<()> {
        let mut tables = self.write()?;
        let k = key(&rate.source_symbol, &rate.dest_symbol);
        if tables.rates.contains_key(&k) {
            if ignore_if_exists {
                return Ok(());
            }
            return Err(LedgerError::RateAlreadyExists {
                source_symbol: rate.source_symbol.clone(),
                dest_symbol: rate.dest_symbol.clone(),
            });
        }
        tables.rates.insert(k, rate.rate);
        Ok(())
    }

    async fn update_rate(&self, rate: &Rate) -> LedgerResult<()> {
        let mut tables = self.write()?;
        match tables.rates.get_mut(&key(&rate.source_symbol, &rate.dest_symbol)) {
            Some(r) => {
                *r = rate.rate;
                Ok(())
            }
            None => Err(LedgerError::RateNotFound {
                source_symbol: rate.source_symbol.clone(),
                dest_symbol: rate.dest_symbol.clone(),
            }),
        }
    }

    async fn delete_rate(&self, source_symbol: &str, dest_symbol: &str) -> LedgerResult<()> {
        self.write()?
            .rates
            .remove(&key(source_symbol, dest_symbol))
            .map(|_| ())
            .ok_or_else(|| LedgerError::RateNotFound {
                source_symbol: source_symbol.to_string(),
                dest_symbol: dest_symbol.to_string(),
            })
    }

    async fn list_forbidden_pairs(&self) -> LedgerResult<Vec<ForbiddenPair>> {
        Ok(self.read()?.forbidden.iter().cloned().collect())
    }

    async fn add_forbidden_pair(&self, pair: &ForbiddenPair) -> LedgerResult<()> {
        self.write()?.forbidden.insert(pair.clone());
        Ok(())
    }

    async fn delete_forbidden_pair(&self, pair: &ForbiddenPair) -> LedgerResult<()> {
        self.write()?.forbidden.remove(pair);
        Ok(())
    }
}
