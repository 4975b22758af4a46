//! Wallet and wallet owner models

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::money::Amount;

// ============================================================================
// Owner Flags (bitmask)
// ============================================================================
pub mod owner_flags {
    pub const CAN_TRADE: i32 = 0x01;
    pub const CAN_WITHDRAW: i32 = 0x02;
    pub const CAN_DEPOSIT: i32 = 0x04;
    pub const DEFAULT: i32 = 0x07;
}

/// Wallet owner (user, system, or service account)
///
/// Created lazily the first time a uuid needs a wallet. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletOwner {
    pub id: i64,
    pub uuid: String,
    pub title: String,
    /// Risk/KYC level tag
    pub level: String,
    pub flags: i32,
}

impl WalletOwner {
    pub fn can_trade(&self) -> bool {
        self.flags & owner_flags::CAN_TRADE != 0
    }
    pub fn can_withdraw(&self) -> bool {
        self.flags & owner_flags::CAN_WITHDRAW != 0
    }
    pub fn can_deposit(&self) -> bool {
        self.flags & owner_flags::CAN_DEPOSIT != 0
    }
}

/// Wallet type
///
/// IDs are stable for PostgreSQL storage as SMALLINT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum WalletType {
    /// Spendable balance
    #[default]
    Main = 1,
    /// Funds staged for outbound withdrawal
    Cashout = 2,
    /// Funds held by the trading subsystem
    Exchange = 3,
}

impl WalletType {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(WalletType::Main),
            2 => Some(WalletType::Cashout),
            3 => Some(WalletType::Exchange),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WalletType::Main => "main",
            WalletType::Cashout => "cashout",
            WalletType::Exchange => "exchange",
        }
    }

    /// CASHOUT is reserved to the withdrawal flow
    #[inline]
    pub fn is_generic_endpoint(&self) -> bool {
        !matches!(self, WalletType::Cashout)
    }
}

impl fmt::Display for WalletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WalletType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "main" | "1" => Ok(WalletType::Main),
            "cashout" | "2" => Ok(WalletType::Cashout),
            "exchange" | "3" => Ok(WalletType::Exchange),
            _ => Err(format!("Invalid wallet type: {}", s)),
        }
    }
}

/// Balance record keyed by (owner, currency, type)
///
/// # Invariants
/// - exactly one wallet per (owner, currency, type)
/// - `balance >= 0` at every committed state
/// - `version` increments on every successful balance mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: i64,
    pub owner_id: i64,
    pub owner_uuid: String,
    pub currency: String,
    pub wallet_type: WalletType,
    pub balance: Decimal,
    pub version: i64,
}

impl Wallet {
    pub fn balance_amount(&self) -> Amount {
        Amount::new(self.currency.clone(), self.balance)
    }
}

/// Key of a wallet in its store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WalletKey {
    pub owner_id: i64,
    pub currency: String,
    pub wallet_type: WalletType,
}

impl WalletKey {
    pub fn new(owner_id: i64, currency: impl Into<String>, wallet_type: WalletType) -> Self {
        Self {
            owner_id,
            currency: currency.into(),
            wallet_type,
        }
    }
}

/// A versioned balance write: applied only if the wallet is still at
/// `expected_version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceWrite {
    pub wallet_id: i64,
    pub expected_version: i64,
    pub new_balance: Decimal,
}
