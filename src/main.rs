//! Custody Ledger service
//!
//! Loads `config/{env}.yaml`, wires the ledger services over PostgreSQL (or
//! in-memory stores when no `postgres_url` is configured) and runs the
//! reservation workers until Ctrl-C.
//!
//! ```text
//! ┌──────────┐    ┌──────────────┐    ┌──────────────────────┐
//! │  Config  │───▶│ LedgerState  │───▶│ ExpirySweeper        │
//! │  (YAML)  │    │ (services)   │    │ SettlementRecovery   │
//! └──────────┘    └──────────────┘    └──────────────────────┘
//! ```

use std::sync::Arc;

use anyhow::Context;
use custody_ledger::config::AppConfig;
use custody_ledger::db::Database;
use custody_ledger::metrics::TracingMetrics;
use custody_ledger::reservation::{ExpirySweeper, SettlementRecovery, WorkerConfig};
use custody_ledger::state::{LedgerState, Stores};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _log_guard = custody_ledger::logging::init_logging(&config);

    tracing::info!("Starting custody ledger in {} mode", env);

    let stores = match &config.postgres_url {
        Some(url) => {
            let db = Database::connect(url)
                .await
                .context("Failed to connect to PostgreSQL")?;
            db.apply_schema().await.context("Failed to apply schema")?;
            Stores::postgres(db.pool().clone())
        }
        None => {
            tracing::warn!("No postgres_url configured; balances live in memory only");
            Stores::in_memory()
        }
    };

    let state = LedgerState::build(&config, stores, Arc::new(TracingMetrics)).await?;

    let worker_config = WorkerConfig::from(&config.reservation);
    let sweeper = ExpirySweeper::new(state.reservations.clone(), worker_config.clone());
    let recovery = SettlementRecovery::new(state.reservations.clone(), worker_config);
    let sweeper_task = tokio::spawn(async move {
        sweeper.run().await;
    });
    let recovery_task = tokio::spawn(async move {
        recovery.run().await;
    });

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown signal received");

    sweeper_task.abort();
    recovery_task.abort();
    Ok(())
}
