//! Reservation workers
//!
//! `ExpirySweeper` closes lapsed reservations. `SettlementRecovery` picks up
//! settlements whose intent was recorded but which never reached COMMITTED.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::service::ReservationService;
use crate::error::LedgerResult;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to scan
    pub scan_interval: Duration,
    /// How long a settlement must be in flight to be considered stalled
    pub stale_threshold: Duration,
    /// Maximum reservations handled per scan
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

pub struct ExpirySweeper {
    service: Arc<ReservationService>,
    config: WorkerConfig,
}

impl ExpirySweeper {
    pub fn new(service: Arc<ReservationService>, config: WorkerConfig) -> Self {
        Self { service, config }
    }

    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            "Starting reservation expiry sweeper"
        );
        loop {
            if let Err(e) = self.sweep().await {
                error!(error = %e, "Expiry sweep failed");
            }
            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// One pass; returns how many reservations moved to EXPIRED
    pub async fn sweep(&self) -> LedgerResult<usize> {
        let expired = self
            .service
            .expire_lapsed(Utc::now(), self.config.batch_size)
            .await?;
        if expired > 0 {
            info!(count = expired, "Expired lapsed reservations");
        } else {
            debug!("No lapsed reservations");
        }
        Ok(expired)
    }
}

pub struct SettlementRecovery {
    service: Arc<ReservationService>,
    config: WorkerConfig,
}

impl SettlementRecovery {
    pub fn new(service: Arc<ReservationService>, config: WorkerConfig) -> Self {
        Self { service, config }
    }

    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            stale_threshold_secs = self.config.stale_threshold.as_secs(),
            "Starting settlement recovery worker"
        );
        loop {
            if let Err(e) = self.scan_and_recover().await {
                error!(error = %e, "Settlement recovery scan failed");
            }
            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// One pass; returns how many settlements were finished or undone
    pub async fn scan_and_recover(&self) -> LedgerResult<usize> {
        let threshold = chrono::Duration::from_std(self.config.stale_threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let stalled = self
            .service
            .store()
            .find_stalled_settlements(Utc::now() - threshold, self.config.batch_size)
            .await?;

        if stalled.is_empty() {
            debug!("No stalled settlements found");
            return Ok(0);
        }
        info!(count = stalled.len(), "Found stalled settlements to recover");

        // Distinct reservations; shared wallets are guarded by the posting CAS
        let results = join_all(stalled.iter().map(|r| self.service.resume(r))).await;

        let mut recovered = 0;
        for (reservation, result) in stalled.iter().zip(results) {
            match result {
                Ok(status) => {
                    info!(
                        reserve_number = %reservation.reserve_number,
                        status = %status,
                        "Settlement recovered"
                    );
                    recovered += 1;
                }
                Err(e) => {
                    error!(
                        reserve_number = %reservation.reserve_number,
                        error = %e,
                        "Failed to recover settlement"
                    );
                }
            }
        }
        Ok(recovered)
    }
}
