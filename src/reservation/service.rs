//! Reservation service
//!
//! `reserve` locks a route rate and checks system liquidity without moving
//! money. `advance` claims the reservation with a settlement intent, posts
//! sender→system then system→receiver, and marks it COMMITTED. Leg refs are
//! derived from the claimed intent, so a resumed settlement never posts twice
//! and a refunded attempt never shadows the next claim.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::models::{Leg, ReservationStatus, ReserveRequest, ReservedTransfer, SettlementIntent};
use super::store::ReservationStore;
use crate::conversion::GraphService;
use crate::currency::{CurrencyProvider, require_active_currency};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{TransferCategory, TransferResult};
use crate::money::Amount;
use crate::transfer::service::{checked_amount, truncate_to_precision};
use crate::transfer::{TransferRequest, TransferService};
use crate::wallet::{WalletManager, WalletOwnerManager, WalletType};

/// Default reservation lifetime
pub const DEFAULT_RESERVATION_TTL_SECS: u64 = 300;

pub struct ReservationService {
    store: Arc<dyn ReservationStore>,
    transfers: Arc<TransferService>,
    graph: Arc<GraphService>,
    currencies: Arc<dyn CurrencyProvider>,
    wallets: Arc<WalletManager>,
    owners: Arc<WalletOwnerManager>,
    ttl: Duration,
}

impl ReservationService {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        transfers: Arc<TransferService>,
        graph: Arc<GraphService>,
        currencies: Arc<dyn CurrencyProvider>,
        ttl_secs: u64,
    ) -> Self {
        let wallets = transfers.wallets().clone();
        let owners = transfers.owners().clone();
        Self {
            store,
            transfers,
            graph,
            currencies,
            wallets,
            owners,
            ttl: Duration::seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX / 1000)),
        }
    }

    pub fn store(&self) -> &Arc<dyn ReservationStore> {
        &self.store
    }

    pub async fn find(&self, reserve_number: &str) -> LedgerResult<Option<ReservedTransfer>> {
        self.store.find(reserve_number).await
    }

    /// Lock a conversion for `ttl`
    ///
    /// # Errors
    /// * `NoConversionPath` - no route between the symbols
    /// * `InsufficientSystemLiquidity` - system cannot cover the destination amount
    pub async fn reserve(&self, req: ReserveRequest) -> LedgerResult<ReservedTransfer> {
        if req.sender_wallet_type == WalletType::Cashout
            || req.receiver_wallet_type == WalletType::Cashout
        {
            return Err(LedgerError::InvalidCashoutUsage);
        }
        let source = require_active_currency(self.currencies.as_ref(), &req.source_symbol).await?;
        let dest = require_active_currency(self.currencies.as_ref(), &req.dest_symbol).await?;
        let source_amount = checked_amount(&source, req.source_amount)?;

        let route = self.graph.first_route(&source.symbol, &dest.symbol).await?;
        let reserved = truncate_to_precision(
            source_amount.convert(dest.symbol.clone(), route.rate())?,
            dest.precision,
        );
        if !reserved.is_positive() {
            return Err(LedgerError::InvalidAmount);
        }

        self.check_system_liquidity(&reserved, req.receiver_wallet_type)
            .await?;

        let now = Utc::now();
        let reservation = ReservedTransfer {
            reserve_number: Uuid::new_v4().to_string(),
            source_symbol: source.symbol,
            dest_symbol: dest.symbol,
            source_amount: source_amount.value(),
            reserved_dest_amount: reserved.value(),
            sender_uuid: req.sender_uuid,
            sender_wallet_type: req.sender_wallet_type,
            receiver_uuid: req.receiver_uuid,
            receiver_wallet_type: req.receiver_wallet_type,
            reserve_date: now,
            exp_date: now + self.ttl,
            status: ReservationStatus::Reserved,
            settlement: None,
        };
        self.store.insert(&reservation).await?;

        info!(
            reserve_number = %reservation.reserve_number,
            source = %source_amount,
            reserved = %reserved,
            hops = route.hops(),
            exp_date = %reservation.exp_date,
            "Reservation created"
        );
        Ok(reservation)
    }

    /// Settle a reservation
    ///
    /// # Errors
    /// * `InvalidReservation` - absent, not RESERVED, expired or already settling
    /// * `Forbidden` - `issuer` is not the sender
    pub async fn advance(
        &self,
        reserve_number: &str,
        description: Option<String>,
        transfer_ref: Option<String>,
        issuer: Option<&str>,
    ) -> LedgerResult<TransferResult> {
        let reservation = self
            .store
            .find(reserve_number)
            .await?
            .ok_or_else(|| LedgerError::InvalidReservation("reservation not found".into()))?;

        if reservation.status != ReservationStatus::Reserved {
            return Err(LedgerError::InvalidReservation(format!(
                "reservation is {}",
                reservation.status
            )));
        }
        if reservation.is_expired_at(Utc::now()) {
            return Err(LedgerError::InvalidReservation("reservation expired".into()));
        }
        if let Some(issuer) = issuer {
            if issuer != reservation.sender_uuid {
                return Err(LedgerError::Forbidden);
            }
        }

        let intent = SettlementIntent::new(
            transfer_ref.unwrap_or_else(|| reservation.reserve_number.clone()),
            description,
        );
        if !self.store.begin_settlement(reserve_number, &intent).await? {
            return Err(LedgerError::InvalidReservation(
                "reservation is already being settled".into(),
            ));
        }

        self.settle(&reservation, &intent).await
    }

    /// Cancel an idle reservation
    pub async fn cancel(&self, reserve_number: &str, issuer: Option<&str>) -> LedgerResult<ReservedTransfer> {
        let reservation = self
            .store
            .find(reserve_number)
            .await?
            .ok_or_else(|| LedgerError::ReservationNotFound(reserve_number.to_string()))?;
        if let Some(issuer) = issuer {
            if issuer != reservation.sender_uuid {
                return Err(LedgerError::Forbidden);
            }
        }
        if !self
            .store
            .close_if_idle(reserve_number, ReservationStatus::Canceled)
            .await?
        {
            return Err(LedgerError::InvalidReservation(
                "reservation cannot be canceled".into(),
            ));
        }
        info!(reserve_number = %reserve_number, "Reservation canceled");
        Ok(ReservedTransfer {
            status: ReservationStatus::Canceled,
            ..reservation
        })
    }

    /// Mark lapsed idle reservations EXPIRED; returns how many moved
    pub async fn expire_lapsed(&self, now: DateTime<Utc>, limit: usize) -> LedgerResult<usize> {
        let mut expired = 0;
        for r in self.store.find_expired(now, limit).await? {
            if self
                .store
                .close_if_idle(&r.reserve_number, ReservationStatus::Expired)
                .await?
            {
                info!(reserve_number = %r.reserve_number, exp_date = %r.exp_date, "Reservation expired");
                expired += 1;
            }
        }
        Ok(expired)
    }

    /// Finish or undo a settlement whose intent was recorded but never completed
    pub async fn resume(&self, reservation: &ReservedTransfer) -> LedgerResult<ReservationStatus> {
        let Some(intent) = reservation.settlement.as_ref() else {
            return Ok(reservation.status);
        };

        let refund_ref = reservation.leg_ref(intent, Leg::Refund);
        if self.transfers.find_by_ref(&refund_ref).await?.is_some() {
            // Already compensated; only the intent was left behind
            self.store.clear_settlement(&reservation.reserve_number).await?;
            return Ok(ReservationStatus::Reserved);
        }

        self.settle(reservation, intent).await?;
        Ok(ReservationStatus::Committed)
    }

    async fn settle(&self, r: &ReservedTransfer, intent: &SettlementIntent) -> LedgerResult<TransferResult> {
        let withdraw = match self.post_leg(r, intent, Leg::Withdraw).await {
            Ok(result) => result,
            Err(e) => {
                let posted = self
                    .transfers
                    .find_by_ref(&r.leg_ref(intent, Leg::Withdraw))
                    .await?
                    .is_some();
                if !posted {
                    self.store.clear_settlement(&r.reserve_number).await?;
                }
                warn!(reserve_number = %r.reserve_number, error = %e, "Settlement leg 1 failed");
                return Err(e);
            }
        };

        let deposit = match self.post_leg(r, intent, Leg::Deposit).await {
            Ok(result) => result,
            Err(e) => {
                warn!(reserve_number = %r.reserve_number, error = %e, "Settlement leg 2 failed, refunding sender");
                match self.post_leg(r, intent, Leg::Refund).await {
                    Ok(_) => {
                        self.store.clear_settlement(&r.reserve_number).await?;
                    }
                    Err(refund_err) => {
                        // Intent stays; recovery retries
                        error!(
                            reserve_number = %r.reserve_number,
                            error = %refund_err,
                            "CRITICAL: settlement refund failed, funds parked in system wallet"
                        );
                    }
                }
                return Err(e);
            }
        };

        if !self
            .store
            .update_status_if(&r.reserve_number, ReservationStatus::Reserved, ReservationStatus::Committed)
            .await?
        {
            warn!(reserve_number = %r.reserve_number, "Reservation was no longer RESERVED at commit");
        }
        info!(
            reserve_number = %r.reserve_number,
            withdraw_leg = %withdraw.transfer_id,
            deposit_leg = %deposit.transfer_id,
            "Reservation committed"
        );

        Ok(TransferResult {
            dest_uuid: deposit.dest_uuid,
            dest_wallet_type: deposit.dest_wallet_type,
            received_amount: deposit.received_amount,
            ..withdraw
        })
    }

    async fn post_leg(&self, r: &ReservedTransfer, intent: &SettlementIntent, leg: Leg) -> LedgerResult<TransferResult> {
        let system = self.owners.system_uuid().to_string();
        let (symbol, sender, sender_type, receiver, receiver_type, amount, category) = match leg {
            Leg::Withdraw => (
                &r.source_symbol,
                r.sender_uuid.clone(),
                r.sender_wallet_type,
                system,
                WalletType::Main,
                r.source_amount,
                TransferCategory::PurchaseFinalized,
            ),
            Leg::Deposit => (
                &r.dest_symbol,
                system,
                WalletType::Main,
                r.receiver_uuid.clone(),
                r.receiver_wallet_type,
                r.reserved_dest_amount,
                TransferCategory::PurchaseFinalized,
            ),
            Leg::Refund => (
                &r.source_symbol,
                system,
                WalletType::Main,
                r.sender_uuid.clone(),
                r.sender_wallet_type,
                r.source_amount,
                TransferCategory::NoCategory,
            ),
        };

        self.transfers
            .transfer(TransferRequest {
                symbol: symbol.clone(),
                sender_uuid: sender,
                sender_wallet_type: sender_type,
                receiver_uuid: receiver,
                receiver_wallet_type: receiver_type,
                amount,
                description: intent.description.clone(),
                transfer_ref: Some(r.leg_ref(intent, leg)),
                category,
            })
            .await
    }

    async fn check_system_liquidity(&self, needed: &Amount, wallet_type: WalletType) -> LedgerResult<()> {
        let system = self.owners.system_owner().await?;
        let available = self
            .wallets
            .find_wallet(&system, needed.currency(), wallet_type)
            .await?
            .map(|w| w.balance)
            .unwrap_or(Decimal::ZERO);
        if available < needed.value() {
            warn!(
                needed = %needed,
                available = %available,
                "System liquidity check failed"
            );
            return Err(LedgerError::InsufficientSystemLiquidity);
        }
        Ok(())
    }
}
