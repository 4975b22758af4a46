//! Withdraw policy provider
//!
//! Per (destination symbol, network) switch, fee and minimum, normally owned
//! by the chain gateway.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::LedgerResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawPolicy {
    pub enabled: bool,
    pub fee: Decimal,
    pub minimum: Decimal,
}

#[async_trait]
pub trait WithdrawPolicyProvider: Send + Sync {
    /// `None` when the pair is unknown
    async fn get_withdraw_policy(
        &self,
        dest_symbol: &str,
        network: &str,
    ) -> LedgerResult<Option<WithdrawPolicy>>;
}

/// Config row for [`StaticWithdrawPolicies`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawPolicyEntry {
    pub symbol: String,
    pub network: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub fee: Decimal,
    #[serde(default)]
    pub minimum: Decimal,
}

fn default_enabled() -> bool {
    true
}

/// Fixed in-memory policy table
#[derive(Default)]
pub struct StaticWithdrawPolicies {
    policies: DashMap<(String, String), WithdrawPolicy>,
}

impl StaticWithdrawPolicies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a WithdrawPolicyEntry>) -> Self {
        let table = Self::new();
        for e in entries {
            table.set(
                &e.symbol,
                &e.network,
                WithdrawPolicy {
                    enabled: e.enabled,
                    fee: e.fee,
                    minimum: e.minimum,
                },
            );
        }
        table
    }

    pub fn set(&self, dest_symbol: &str, network: &str, policy: WithdrawPolicy) {
        self.policies
            .insert((dest_symbol.to_string(), network.to_string()), policy);
    }
}

#[async_trait]
impl WithdrawPolicyProvider for StaticWithdrawPolicies {
    async fn get_withdraw_policy(
        &self,
        dest_symbol: &str,
        network: &str,
    ) -> LedgerResult<Option<WithdrawPolicy>> {
        Ok(self
            .policies
            .get(&(dest_symbol.to_string(), network.to_string()))
            .map(|p| *p.value()))
    }
}
