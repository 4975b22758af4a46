//! Graph service
//!
//! Serves routes from a cached [`ConversionGraph`] snapshot. Every admin
//! mutation goes through here and drops the snapshot; the next lookup
//! rebuilds it from the currency and rate stores.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::graph::{ConversionGraph, DEFAULT_MAX_HOPS};
use super::models::{ForbiddenPair, Rate, Route, RoutePolicy};
use super::store::RateStore;
use crate::currency::CurrencyProvider;
use crate::error::{LedgerError, LedgerResult};
use crate::money::Amount;

pub struct GraphService {
    currencies: Arc<dyn CurrencyProvider>,
    rates: Arc<dyn RateStore>,
    max_hops: usize,
    policy: RoutePolicy,
    snapshot: RwLock<Option<Arc<ConversionGraph>>>,
    generation: AtomicU64,
}

impl GraphService {
    pub fn new(currencies: Arc<dyn CurrencyProvider>, rates: Arc<dyn RateStore>) -> Self {
        Self::with_policy(currencies, rates, DEFAULT_MAX_HOPS, RoutePolicy::default())
    }

    pub fn with_policy(
        currencies: Arc<dyn CurrencyProvider>,
        rates: Arc<dyn RateStore>,
        max_hops: usize,
        policy: RoutePolicy,
    ) -> Self {
        Self {
            currencies,
            rates,
            max_hops,
            policy,
            snapshot: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> RoutePolicy {
        self.policy
    }

    /// Current graph, rebuilt if an admin update dropped it
    pub async fn snapshot(&self) -> LedgerResult<Arc<ConversionGraph>> {
        if let Some(graph) = self.snapshot.read().await.as_ref() {
            return Ok(graph.clone());
        }

        let generation = self.generation.load(Ordering::Acquire);
        let currencies = self.currencies.list_currencies().await?;
        let rates = self.rates.list_rates().await?;
        let forbidden = self.rates.list_forbidden_pairs().await?;
        let graph = Arc::new(ConversionGraph::build(
            &currencies,
            &rates,
            &forbidden,
            self.max_hops,
        ));
        debug!(
            nodes = currencies.len(),
            edges = graph.edge_count(),
            "Conversion graph rebuilt"
        );

        let mut slot = self.snapshot.write().await;
        // An update landed while building: serve this one, don't cache it
        if self.generation.load(Ordering::Acquire) == generation {
            *slot = Some(graph.clone());
        }
        Ok(graph)
    }

    pub async fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        *self.snapshot.write().await = None;
    }

    /// Up to `limit` candidate routes in policy order
    pub async fn routes(&self, source: &str, dest: &str, limit: usize) -> LedgerResult<Vec<Route>> {
        let graph = self.snapshot().await?;
        Ok(graph.routes(source, dest, self.policy).take(limit).collect())
    }

    /// First route under the configured policy
    ///
    /// # Errors
    /// `NoConversionPath` when routing is exhausted
    pub async fn first_route(&self, source: &str, dest: &str) -> LedgerResult<Route> {
        let graph = self.snapshot().await?;
        graph
            .routes(source, dest, self.policy)
            .next()
            .ok_or_else(|| LedgerError::NoConversionPath {
                source_symbol: source.to_string(),
                dest_symbol: dest.to_string(),
            })
    }

    pub async fn calculate_destination_amount(
        &self,
        amount: &Amount,
        dest_symbol: &str,
    ) -> LedgerResult<Amount> {
        let route = self.first_route(amount.currency(), dest_symbol).await?;
        amount.convert(dest_symbol, route.rate())
    }

    // === Administration ===

    pub async fn list_rates(&self) -> LedgerResult<Vec<Rate>> {
        self.rates.list_rates().await
    }

    pub async fn get_rate(&self, source: &str, dest: &str) -> LedgerResult<Option<Rate>> {
        self.rates.get_rate(source, dest).await
    }

    pub async fn add_rate(&self, rate: Rate, ignore_if_exists: bool) -> LedgerResult<()> {
        rate.validate()?;
        self.require_currency(&rate.source_symbol).await?;
        self.require_currency(&rate.dest_symbol).await?;
        self.rates.add_rate(&rate, ignore_if_exists).await?;
        info!(source = %rate.source_symbol, dest = %rate.dest_symbol, rate = %rate.rate, "Rate added");
        self.invalidate().await;
        Ok(())
    }

    pub async fn update_rate(&self, rate: Rate) -> LedgerResult<Vec<Rate>> {
        rate.validate()?;
        self.rates.update_rate(&rate).await?;
        info!(source = %rate.source_symbol, dest = %rate.dest_symbol, rate = %rate.rate, "Rate updated");
        self.invalidate().await;
        self.rates.list_rates().await
    }

    pub async fn delete_rate(&self, source: &str, dest: &str) -> LedgerResult<Vec<Rate>> {
        self.rates.delete_rate(source, dest).await?;
        info!(source = %source, dest = %dest, "Rate deleted");
        self.invalidate().await;
        self.rates.list_rates().await
    }

    pub async fn list_forbidden_pairs(&self) -> LedgerResult<Vec<ForbiddenPair>> {
        self.rates.list_forbidden_pairs().await
    }

    pub async fn add_forbidden_pair(&self, pair: ForbiddenPair) -> LedgerResult<()> {
        self.rates.add_forbidden_pair(&pair).await?;
        info!(source = %pair.source_symbol, dest = %pair.dest_symbol, "Forbidden pair added");
        self.invalidate().await;
        Ok(())
    }

    pub async fn delete_forbidden_pair(&self, pair: ForbiddenPair) -> LedgerResult<Vec<ForbiddenPair>> {
        self.rates.delete_forbidden_pair(&pair).await?;
        info!(source = %pair.source_symbol, dest = %pair.dest_symbol, "Forbidden pair deleted");
        self.invalidate().await;
        self.rates.list_forbidden_pairs().await
    }

    pub async fn transitive_symbols(&self) -> LedgerResult<Vec<String>> {
        Ok(self
            .currencies
            .list_currencies()
            .await?
            .into_iter()
            .filter(|c| c.is_transitive)
            .map(|c| c.symbol)
            .collect())
    }

    pub async fn add_transitive_symbols(&self, symbols: &[String]) -> LedgerResult<()> {
        for symbol in symbols {
            self.currencies.set_transitive(symbol, true).await?;
        }
        info!(symbols = ?symbols, "Transitive symbols added");
        self.invalidate().await;
        Ok(())
    }

    pub async fn delete_transitive_symbols(&self, symbols: &[String]) -> LedgerResult<Vec<String>> {
        for symbol in symbols {
            self.currencies.set_transitive(symbol, false).await?;
        }
        info!(symbols = ?symbols, "Transitive symbols removed");
        self.invalidate().await;
        self.transitive_symbols().await
    }

    /// Currency flags changed outside this service
    pub async fn on_currency_updated(&self) {
        self.invalidate().await;
    }

    async fn require_currency(&self, symbol: &str) -> LedgerResult<()> {
        self.currencies
            .get_currency(symbol)
            .await?
            .map(|_| ())
            .ok_or_else(|| LedgerError::CurrencyNotFound(symbol.to_string()))
    }
}
