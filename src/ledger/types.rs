//! Posting types
//!
//! A [`TransferRecord`] is the immutable, append-only trace of one balance
//! movement produced by the transfer engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::money::Amount;
use crate::wallet::{Wallet, WalletType};

/// Posting ID - ULID-based, sortable by creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferId(ulid::Ulid);

impl TransferId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Category tag of a posting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum TransferCategory {
    #[default]
    NoCategory = 0,
    Deposit = 1,
    DepositManually = 2,
    WithdrawRequest = 10,
    WithdrawAccept = 11,
    WithdrawCancel = 12,
    WithdrawReject = 13,
    WithdrawManually = 14,
    PurchaseFinalized = 20,
    Trade = 30,
    Fee = 31,
}

impl TransferCategory {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransferCategory::NoCategory),
            1 => Some(TransferCategory::Deposit),
            2 => Some(TransferCategory::DepositManually),
            10 => Some(TransferCategory::WithdrawRequest),
            11 => Some(TransferCategory::WithdrawAccept),
            12 => Some(TransferCategory::WithdrawCancel),
            13 => Some(TransferCategory::WithdrawReject),
            14 => Some(TransferCategory::WithdrawManually),
            20 => Some(TransferCategory::PurchaseFinalized),
            30 => Some(TransferCategory::Trade),
            31 => Some(TransferCategory::Fee),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferCategory::NoCategory => "NO_CATEGORY",
            TransferCategory::Deposit => "DEPOSIT",
            TransferCategory::DepositManually => "DEPOSIT_MANUALLY",
            TransferCategory::WithdrawRequest => "WITHDRAW_REQUEST",
            TransferCategory::WithdrawAccept => "WITHDRAW_ACCEPT",
            TransferCategory::WithdrawCancel => "WITHDRAW_CANCEL",
            TransferCategory::WithdrawReject => "WITHDRAW_REJECT",
            TransferCategory::WithdrawManually => "WITHDRAW_MANUALLY",
            TransferCategory::PurchaseFinalized => "PURCHASE_FINALIZED",
            TransferCategory::Trade => "TRADE",
            TransferCategory::Fee => "FEE",
        }
    }

    /// Counter emitted for each successful posting of this class
    pub fn metric_name(&self) -> &'static str {
        match self {
            TransferCategory::NoCategory => "transfer_event",
            TransferCategory::Deposit => "deposit_event",
            TransferCategory::DepositManually => "deposit_manually_event",
            TransferCategory::WithdrawRequest => "withdraw_request_event",
            TransferCategory::WithdrawAccept => "withdraw_accept_event",
            TransferCategory::WithdrawCancel => "withdraw_cancel_event",
            TransferCategory::WithdrawReject => "withdraw_reject_event",
            TransferCategory::WithdrawManually => "withdraw_manually_event",
            TransferCategory::PurchaseFinalized => "purchase_finalized_event",
            TransferCategory::Trade => "trade_event",
            TransferCategory::Fee => "fee_event",
        }
    }
}

impl fmt::Display for TransferCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Engine input: move `source_amount` out of `source`, `dest_amount` into `dest`
#[derive(Debug, Clone)]
pub struct TransferCommand {
    pub source: Wallet,
    pub dest: Wallet,
    pub source_amount: Amount,
    pub dest_amount: Amount,
    pub description: Option<String>,
    pub transfer_ref: Option<String>,
    pub category: TransferCategory,
}

impl TransferCommand {
    /// Same-currency move of `amount`
    pub fn new(source: Wallet, dest: Wallet, amount: Amount, category: TransferCategory) -> Self {
        Self {
            source,
            dest,
            dest_amount: amount.clone(),
            source_amount: amount,
            description: None,
            transfer_ref: None,
            category,
        }
    }

    pub fn with_dest_amount(mut self, dest_amount: Amount) -> Self {
        self.dest_amount = dest_amount;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_ref(mut self, transfer_ref: Option<String>) -> Self {
        self.transfer_ref = transfer_ref;
        self
    }
}

/// Immutable posting record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: TransferId,
    pub source_wallet_id: i64,
    pub source_owner_uuid: String,
    pub source_wallet_type: WalletType,
    pub dest_wallet_id: i64,
    pub dest_owner_uuid: String,
    pub dest_wallet_type: WalletType,
    pub source_amount: Amount,
    pub dest_amount: Amount,
    pub source_balance_before: Decimal,
    pub source_balance_after: Decimal,
    pub dest_balance_before: Decimal,
    pub dest_balance_after: Decimal,
    pub description: Option<String>,
    pub transfer_ref: Option<String>,
    pub category: TransferCategory,
    pub created_at: DateTime<Utc>,
}

/// Result shape returned to callers of the transfer operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer_id: TransferId,
    pub date: DateTime<Utc>,
    pub source_uuid: String,
    pub source_wallet_type: WalletType,
    pub source_balance_before: Decimal,
    pub source_balance_after: Decimal,
    pub amount: Amount,
    pub dest_uuid: String,
    pub dest_wallet_type: WalletType,
    pub received_amount: Amount,
}

impl From<&TransferRecord> for TransferResult {
    fn from(r: &TransferRecord) -> Self {
        Self {
            transfer_id: r.id,
            date: r.created_at,
            source_uuid: r.source_owner_uuid.clone(),
            source_wallet_type: r.source_wallet_type,
            source_balance_before: r.source_balance_before,
            source_balance_after: r.source_balance_after,
            amount: r.source_amount.clone(),
            dest_uuid: r.dest_owner_uuid.clone(),
            dest_wallet_type: r.dest_wallet_type,
            received_amount: r.dest_amount.clone(),
        }
    }
}

/// Offset/limit pagination with time ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
    pub ascending: bool,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
            ascending: false,
        }
    }
}

/// Transfer history filter
#[derive(Debug, Clone, Default)]
pub struct TransferQuery {
    pub owner_uuid: Option<String>,
    pub currency: Option<String>,
    pub category: Option<TransferCategory>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub page: Page,
}

impl TransferQuery {
    pub fn matches(&self, r: &TransferRecord) -> bool {
        if let Some(uuid) = &self.owner_uuid {
            if &r.source_owner_uuid != uuid && &r.dest_owner_uuid != uuid {
                return false;
            }
        }
        if let Some(currency) = &self.currency {
            if r.source_amount.currency() != currency && r.dest_amount.currency() != currency {
                return false;
            }
        }
        if let Some(category) = self.category {
            if r.category != category {
                return false;
            }
        }
        if let Some(start) = self.start {
            if r.created_at < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if r.created_at > end {
                return false;
            }
        }
        true
    }
}
