use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::conversion::{DEFAULT_MAX_HOPS, RoutePolicy};
use crate::currency::Currency;
use crate::reservation::DEFAULT_RESERVATION_TTL_SECS;
use crate::wallet::DEFAULT_MAX_CAS_RETRIES;
use crate::withdraw::WithdrawPolicyEntry;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default)]
    pub use_json: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String,
    /// PostgreSQL connection URL; in-memory stores when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub reservation: ReservationConfig,
    /// Currencies registered at startup if missing
    #[serde(default)]
    pub currencies: Vec<Currency>,
    #[serde(default)]
    pub withdraw_policies: Vec<WithdrawPolicyEntry>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

fn default_log_file() -> String {
    "custody-ledger.log".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerConfig {
    pub system_uuid: String,
    pub max_cas_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            system_uuid: "1".to_string(),
            max_cas_retries: DEFAULT_MAX_CAS_RETRIES,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConversionConfig {
    pub max_hops: usize,
    pub route_policy: RoutePolicy,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_hops: DEFAULT_MAX_HOPS,
            route_policy: RoutePolicy::ShortestHops,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ReservationConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub sweep_batch_size: usize,
    /// Age after which an in-flight settlement is picked up by recovery
    pub settlement_grace_secs: u64,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_RESERVATION_TTL_SECS,
            sweep_interval_secs: 30,
            sweep_batch_size: 100,
            settlement_grace_secs: 60,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_dir: default_log_dir(),
            log_file: default_log_file(),
            use_json: false,
            rotation: default_rotation(),
            postgres_url: None,
            ledger: LedgerConfig::default(),
            conversion: ConversionConfig::default(),
            reservation: ReservationConfig::default(),
            currencies: Vec::new(),
            withdraw_policies: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load `config/{env}.yaml`
    pub fn load(env: &str) -> anyhow::Result<Self> {
        Self::load_from(format!("config/{}.yaml", env))
    }

    pub fn load_from(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config yaml: {}", path.display()))
    }
}
