//! Withdraw models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ledger::{Page, TransferId};

/// Withdraw status
///
/// ```text
/// CREATED ──► PROCESSING ──► DONE
///    │  │          │
///    │  └──────────┴──────► REJECTED
///    └──► CANCELED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum WithdrawStatus {
    Created = 0,
    Processing = 10,
    Done = 20,
    Canceled = 30,
    Rejected = 40,
}

impl WithdrawStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WithdrawStatus::Done | WithdrawStatus::Canceled | WithdrawStatus::Rejected
        )
    }

    #[inline]
    pub fn can_be_accepted(&self) -> bool {
        matches!(self, WithdrawStatus::Created | WithdrawStatus::Processing)
    }

    #[inline]
    pub fn can_be_processed(&self) -> bool {
        matches!(self, WithdrawStatus::Created)
    }

    #[inline]
    pub fn can_be_canceled(&self) -> bool {
        matches!(self, WithdrawStatus::Created)
    }

    #[inline]
    pub fn can_be_rejected(&self) -> bool {
        matches!(self, WithdrawStatus::Created | WithdrawStatus::Processing)
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(WithdrawStatus::Created),
            10 => Some(WithdrawStatus::Processing),
            20 => Some(WithdrawStatus::Done),
            30 => Some(WithdrawStatus::Canceled),
            40 => Some(WithdrawStatus::Rejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawStatus::Created => "CREATED",
            WithdrawStatus::Processing => "PROCESSING",
            WithdrawStatus::Done => "DONE",
            WithdrawStatus::Canceled => "CANCELED",
            WithdrawStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for WithdrawStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum WithdrawType {
    #[default]
    OnChain = 1,
    Manually = 2,
}

impl WithdrawType {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(WithdrawType::OnChain),
            2 => Some(WithdrawType::Manually),
            _ => None,
        }
    }
}

/// Withdraw record
///
/// `amount` is the net payout; the CASHOUT wallet holds `amount + applied_fee`
/// while the request is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdraw {
    pub id: i64,
    pub owner_uuid: String,
    pub currency: String,
    /// CASHOUT wallet staging the funds
    pub wallet_id: i64,
    pub amount: Decimal,
    pub request_transaction: TransferId,
    pub final_transaction: Option<TransferId>,
    pub applied_fee: Decimal,
    pub dest_amount: Option<Decimal>,
    pub dest_symbol: Option<String>,
    pub dest_address: Option<String>,
    pub dest_network: Option<String>,
    pub dest_note: Option<String>,
    pub dest_transaction_ref: Option<String>,
    pub status_reason: Option<String>,
    pub status: WithdrawStatus,
    pub applicator: Option<String>,
    pub withdraw_type: WithdrawType,
    pub attachment: Option<String>,
    pub create_date: DateTime<Utc>,
    pub update_date: Option<DateTime<Utc>>,
}

impl Withdraw {
    /// Amount staged in CASHOUT
    #[inline]
    pub fn staged_amount(&self) -> Decimal {
        self.amount + self.applied_fee
    }
}

/// Insert shape; the store assigns `id`
#[derive(Debug, Clone)]
pub struct NewWithdraw {
    pub owner_uuid: String,
    pub currency: String,
    pub wallet_id: i64,
    pub amount: Decimal,
    pub request_transaction: TransferId,
    pub final_transaction: Option<TransferId>,
    pub applied_fee: Decimal,
    pub dest_amount: Option<Decimal>,
    pub dest_symbol: Option<String>,
    pub dest_address: Option<String>,
    pub dest_network: Option<String>,
    pub dest_note: Option<String>,
    pub dest_transaction_ref: Option<String>,
    pub status: WithdrawStatus,
    pub applicator: Option<String>,
    pub withdraw_type: WithdrawType,
    pub attachment: Option<String>,
}

impl NewWithdraw {
    pub fn into_withdraw(self, id: i64, create_date: DateTime<Utc>) -> Withdraw {
        Withdraw {
            id,
            owner_uuid: self.owner_uuid,
            currency: self.currency,
            wallet_id: self.wallet_id,
            amount: self.amount,
            request_transaction: self.request_transaction,
            final_transaction: self.final_transaction,
            applied_fee: self.applied_fee,
            dest_amount: self.dest_amount,
            dest_symbol: self.dest_symbol,
            dest_address: self.dest_address,
            dest_network: self.dest_network,
            dest_note: self.dest_note,
            dest_transaction_ref: self.dest_transaction_ref,
            status_reason: None,
            status: self.status,
            applicator: self.applicator,
            withdraw_type: self.withdraw_type,
            attachment: self.attachment,
            create_date,
            update_date: None,
        }
    }
}

/// Fields written together with a status transition
#[derive(Debug, Clone, Default)]
pub struct WithdrawUpdate {
    pub final_transaction: Option<TransferId>,
    pub dest_amount: Option<Decimal>,
    pub dest_note: Option<String>,
    pub dest_transaction_ref: Option<String>,
    pub status_reason: Option<String>,
    pub applicator: Option<String>,
}

/// Owner request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawCommand {
    pub uuid: String,
    pub currency: String,
    /// Gross amount leaving MAIN, fee included
    pub amount: Decimal,
    pub description: Option<String>,
    pub dest_symbol: String,
    pub dest_address: String,
    pub dest_network: String,
    pub dest_note: Option<String>,
}

/// Operator acceptance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WithdrawAcceptCommand {
    pub withdraw_id: i64,
    pub dest_amount: Option<Decimal>,
    pub dest_transaction_ref: Option<String>,
    pub dest_note: Option<String>,
    pub applicator: Option<String>,
}

/// Operator rejection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WithdrawRejectCommand {
    pub withdraw_id: i64,
    pub status_reason: String,
    pub dest_note: Option<String>,
    pub applicator: Option<String>,
}

/// Operator-recorded off-ledger payout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualWithdrawCommand {
    pub symbol: String,
    pub source_uuid: String,
    pub receiver_uuid: String,
    pub amount: Decimal,
    pub description: Option<String>,
    pub transfer_ref: Option<String>,
    pub attachment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawActionResult {
    pub withdraw_id: i64,
    pub status: WithdrawStatus,
}

/// Admin search filter
#[derive(Debug, Clone, Default)]
pub struct WithdrawCriteria {
    pub owner_uuid: Option<String>,
    pub currency: Option<String>,
    pub dest_transaction_ref: Option<String>,
    pub dest_address: Option<String>,
    /// Empty matches any status
    pub statuses: Vec<WithdrawStatus>,
}

impl WithdrawCriteria {
    pub fn matches(&self, w: &Withdraw) -> bool {
        if self.owner_uuid.as_ref().is_some_and(|u| u != &w.owner_uuid) {
            return false;
        }
        if self.currency.as_ref().is_some_and(|c| c != &w.currency) {
            return false;
        }
        if let Some(r) = &self.dest_transaction_ref {
            if w.dest_transaction_ref.as_ref() != Some(r) {
                return false;
            }
        }
        if let Some(a) = &self.dest_address {
            if w.dest_address.as_ref() != Some(a) {
                return false;
            }
        }
        self.statuses.is_empty() || self.statuses.contains(&w.status)
    }
}

/// Owner history filter
#[derive(Debug, Clone)]
pub struct WithdrawHistoryQuery {
    pub owner_uuid: String,
    pub currency: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub page: Page,
}

impl WithdrawHistoryQuery {
    pub fn new(owner_uuid: impl Into<String>) -> Self {
        Self {
            owner_uuid: owner_uuid.into(),
            currency: None,
            start: None,
            end: None,
            page: Page::default(),
        }
    }

    pub fn matches(&self, w: &Withdraw) -> bool {
        w.owner_uuid == self.owner_uuid
            && self.currency.as_ref().is_none_or(|c| c == &w.currency)
            && self.start.is_none_or(|s| w.create_date >= s)
            && self.end.is_none_or(|e| w.create_date <= e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_allow_lists() {
        use WithdrawStatus::*;
        assert!(Created.can_be_accepted() && Processing.can_be_accepted());
        assert!(!Done.can_be_accepted());
        assert!(Created.can_be_processed() && !Processing.can_be_processed());
        assert!(Created.can_be_canceled() && !Processing.can_be_canceled());
        assert!(Created.can_be_rejected() && Processing.can_be_rejected());
        for terminal in [Done, Canceled, Rejected] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_be_accepted());
            assert!(!terminal.can_be_processed());
            assert!(!terminal.can_be_canceled());
            assert!(!terminal.can_be_rejected());
        }
    }

    #[test]
    fn test_status_id_roundtrip() {
        for s in [
            WithdrawStatus::Created,
            WithdrawStatus::Processing,
            WithdrawStatus::Done,
            WithdrawStatus::Canceled,
            WithdrawStatus::Rejected,
        ] {
            assert_eq!(WithdrawStatus::from_id(s.id()), Some(s));
        }
        assert_eq!(WithdrawStatus::from_id(5), None);
    }

    #[test]
    fn test_command_from_json() {
        let cmd: WithdrawCommand = serde_json::from_str(
            r#"{"uuid":"alice","currency":"USDT","amount":"12.5","description":null,
                "dest_symbol":"USDT","dest_address":"TQ1xyz","dest_network":"TRON","dest_note":null}"#,
        )
        .unwrap();
        assert_eq!(cmd.amount, Decimal::new(125, 1));

        let json = serde_json::to_value(WithdrawStatus::Processing).unwrap();
        assert_eq!(json, serde_json::json!("PROCESSING"));
    }
}
