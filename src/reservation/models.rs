//! Reservation models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::wallet::WalletType;

/// Reservation status
///
/// RESERVED is the only non-terminal state; it moves exactly once to one of
/// the other three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum ReservationStatus {
    Reserved = 0,
    Committed = 1,
    Expired = 2,
    Canceled = 3,
}

impl ReservationStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Reserved)
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(ReservationStatus::Reserved),
            1 => Some(ReservationStatus::Committed),
            2 => Some(ReservationStatus::Expired),
            3 => Some(ReservationStatus::Canceled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Reserved => "RESERVED",
            ReservationStatus::Committed => "COMMITTED",
            ReservationStatus::Expired => "EXPIRED",
            ReservationStatus::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable marker written before the first settlement leg
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementIntent {
    /// Prefix of both leg refs
    pub settle_ref: String,
    /// Fresh per claim; a refunded attempt never shares leg refs with the next one
    pub attempt: String,
    pub description: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl SettlementIntent {
    pub fn new(settle_ref: impl Into<String>, description: Option<String>) -> Self {
        Self {
            settle_ref: settle_ref.into(),
            attempt: Uuid::new_v4().simple().to_string(),
            description,
            started_at: Utc::now(),
        }
    }
}

/// Settlement legs of a reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    /// sender → system, source currency
    Withdraw,
    /// system → receiver, destination currency
    Deposit,
    /// system → sender, reverses `Withdraw`
    Refund,
}

impl Leg {
    fn suffix(&self) -> &'static str {
        match self {
            Leg::Withdraw => "withdraw",
            Leg::Deposit => "deposit",
            Leg::Refund => "refund",
        }
    }
}

/// Locked conversion rate and amount awaiting settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedTransfer {
    pub reserve_number: String,
    pub source_symbol: String,
    pub dest_symbol: String,
    pub source_amount: Decimal,
    pub reserved_dest_amount: Decimal,
    pub sender_uuid: String,
    pub sender_wallet_type: WalletType,
    pub receiver_uuid: String,
    pub receiver_wallet_type: WalletType,
    pub reserve_date: DateTime<Utc>,
    pub exp_date: DateTime<Utc>,
    pub status: ReservationStatus,
    pub settlement: Option<SettlementIntent>,
}

impl ReservedTransfer {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.exp_date
    }

    /// `{settle_ref}-{reserve_number}-{attempt}-{leg}`
    pub fn leg_ref(&self, intent: &SettlementIntent, leg: Leg) -> String {
        format!(
            "{}-{}-{}-{}",
            intent.settle_ref,
            self.reserve_number,
            intent.attempt,
            leg.suffix()
        )
    }
}

/// Caller input for a reservation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveRequest {
    pub source_amount: Decimal,
    pub source_symbol: String,
    pub dest_symbol: String,
    pub sender_uuid: String,
    #[serde(default)]
    pub sender_wallet_type: WalletType,
    pub receiver_uuid: String,
    #[serde(default)]
    pub receiver_wallet_type: WalletType,
}
