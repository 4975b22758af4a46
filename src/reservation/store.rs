//! Reservation store
//!
//! All transitions are conditional writes keyed on the current status (and
//! on whether a settlement intent is present), so two racing callers can
//! never both move the same reservation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::models::{ReservationStatus, ReservedTransfer, SettlementIntent};
use crate::error::{LedgerError, LedgerResult};

#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn insert(&self, reservation: &ReservedTransfer) -> LedgerResult<()>;

    async fn find(&self, reserve_number: &str) -> LedgerResult<Option<ReservedTransfer>>;

    /// Claim settlement: RESERVED with no intent → intent recorded
    async fn begin_settlement(&self, reserve_number: &str, intent: &SettlementIntent) -> LedgerResult<bool>;

    /// Drop the intent of a RESERVED reservation whose settlement was undone
    async fn clear_settlement(&self, reserve_number: &str) -> LedgerResult<bool>;

    /// RESERVED with no intent → `new_status` (cancel / expire)
    async fn close_if_idle(&self, reserve_number: &str, new_status: ReservationStatus) -> LedgerResult<bool>;

    /// Atomic CAS on status
    async fn update_status_if(
        &self,
        reserve_number: &str,
        expected: ReservationStatus,
        new_status: ReservationStatus,
    ) -> LedgerResult<bool>;

    /// RESERVED, no intent, `exp_date <= now`
    async fn find_expired(&self, now: DateTime<Utc>, limit: usize) -> LedgerResult<Vec<ReservedTransfer>>;

    /// RESERVED with an intent started before `started_before`
    async fn find_stalled_settlements(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> LedgerResult<Vec<ReservedTransfer>>;
}

/// In-memory [`ReservationStore`]
#[derive(Default)]
pub struct InMemoryReservationStore {
    reservations: DashMap<String, ReservedTransfer>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, reserve_number: &str, f: F) -> LedgerResult<bool>
    where
        F: FnOnce(&mut ReservedTransfer) -> bool,
    {
        match self.reservations.get_mut(reserve_number) {
            Some(mut entry) => Ok(f(entry.value_mut())),
            None => Err(LedgerError::ReservationNotFound(reserve_number.to_string())),
        }
    }

    fn collect<F>(&self, limit: usize, pred: F) -> Vec<ReservedTransfer>
    where
        F: Fn(&ReservedTransfer) -> bool,
    {
        let mut out: Vec<ReservedTransfer> = self
            .reservations
            .iter()
            .filter(|e| pred(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| {
            a.reserve_date
                .cmp(&b.reserve_date)
                .then_with(|| a.reserve_number.cmp(&b.reserve_number))
        });
        out.truncate(limit);
        out
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn insert(&self, reservation: &ReservedTransfer) -> LedgerResult<()> {
        use dashmap::mapref::entry::Entry;
        match self.reservations.entry(reservation.reserve_number.clone()) {
            Entry::Occupied(_) => Err(LedgerError::System(format!(
                "duplicate reserve number: {}",
                reservation.reserve_number
            ))),
            Entry::Vacant(slot) => {
                slot.insert(reservation.clone());
                Ok(())
            }
        }
    }

    async fn find(&self, reserve_number: &str) -> LedgerResult<Option<ReservedTransfer>> {
        Ok(self.reservations.get(reserve_number).map(|e| e.value().clone()))
    }

    async fn begin_settlement(&self, reserve_number: &str, intent: &SettlementIntent) -> LedgerResult<bool> {
        self.update(reserve_number, |r| {
            if r.status != ReservationStatus::Reserved || r.settlement.is_some() {
                return false;
            }
            r.settlement = Some(intent.clone());
            true
        })
    }

    async fn clear_settlement(&self, reserve_number: &str) -> LedgerResult<bool> {
        self.update(reserve_number, |r| {
            if r.status != ReservationStatus::Reserved || r.settlement.is_none() {
                return false;
            }
            r.settlement = None;
            true
        })
    }

    async fn close_if_idle(&self, reserve_number: &str, new_status: ReservationStatus) -> LedgerResult<bool> {
        self.update(reserve_number, |r| {
            if r.status != ReservationStatus::Reserved || r.settlement.is_some() {
                return false;
            }
            r.status = new_status;
            true
        })
    }

    async fn update_status_if(
        &self,
        reserve_number: &str,
        expected: ReservationStatus,
        new_status: ReservationStatus,
    ) -> LedgerResult<bool> {
        self.update(reserve_number, |r| {
            if r.status != expected {
                return false;
            }
            r.status = new_status;
            true
        })
    }

    async fn find_expired(&self, now: DateTime<Utc>, limit: usize) -> LedgerResult<Vec<ReservedTransfer>> {
        Ok(self.collect(limit, |r| {
            r.status == ReservationStatus::Reserved && r.settlement.is_none() && r.is_expired_at(now)
        }))
    }

    async fn find_stalled_settlements(
        &self,
        started_before: DateTime<Utc>,
        limit: usize,
    ) -> LedgerResult<Vec<ReservedTransfer>> {
        Ok(self.collect(limit, |r| {
            r.status == ReservationStatus::Reserved
                && r.settlement
                    .as_ref()
                    .is_some_and(|s| s.started_at < started_before)
        }))
    }
}
