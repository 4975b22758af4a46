//! Ledger Error Types
//!
//! Every failure of a ledger operation is one of these variants. Callers map
//! them to transport status codes at their own boundary via [`LedgerError::code`]
//! and [`LedgerError::http_status`].

use thiserror::Error;

/// Coarse error classes shared by all ledger operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    InsufficientFunds,
    Forbidden,
    NoConversionPath,
    Contention,
    Invalid,
    Internal,
}

/// Ledger error types
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    // === Not Found ===
    #[error("Currency not found: {0}")]
    CurrencyNotFound(String),

    #[error("Wallet not found")]
    WalletNotFound,

    #[error("Wallet owner not found: {0}")]
    WalletOwnerNotFound(String),

    #[error("Withdraw not found: {0}")]
    WithdrawNotFound(i64),

    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),

    #[error("Rate not found: {source_symbol}/{dest_symbol}")]
    RateNotFound {
        source_symbol: String,
        dest_symbol: String,
    },

    // === Invalid State ===
    #[error("Withdraw already processed")]
    WithdrawAlreadyProcessed,

    #[error("Withdraw cannot be canceled")]
    WithdrawCannotBeCanceled,

    #[error("Withdraw cannot be rejected")]
    WithdrawCannotBeRejected,

    #[error("Invalid reservation: {0}")]
    InvalidReservation(String),

    #[error("Transfer ref already used by a different posting: {0}")]
    DuplicateTransferRef(String),

    // === Funds ===
    #[error("Insufficient balance")]
    InsufficientFunds,

    #[error("Current system assets are not enough")]
    InsufficientSystemLiquidity,

    // === Access ===
    #[error("Forbidden")]
    Forbidden,

    #[error("Cashout wallet cannot be used as a transfer endpoint")]
    InvalidCashoutUsage,

    // === Conversion ===
    #[error("No exchangeable path from {source_symbol} to {dest_symbol}")]
    NoConversionPath {
        source_symbol: String,
        dest_symbol: String,
    },

    // === Concurrency ===
    #[error("Wallet {wallet_id} contention: gave up after {attempts} attempts")]
    Contention { wallet_id: i64, attempts: u32 },

    // === Validation ===
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch { expected: String, actual: String },

    #[error("Currency is not active: {0}")]
    CurrencyInactive(String),

    #[error("Wallet already exists")]
    WalletAlreadyExists,

    #[error("Rate already exists: {source_symbol}/{dest_symbol}")]
    RateAlreadyExists {
        source_symbol: String,
        dest_symbol: String,
    },

    #[error("Rate must be greater than zero")]
    InvalidRate,

    #[error("Source and destination wallet are the same")]
    SameWallet,

    #[error("Withdraw not allowed")]
    WithdrawNotAllowed,

    #[error("Withdraw amount is less than minimum")]
    AmountBelowMinimum,

    #[error("Withdraw amount exceeds wallet balance")]
    WithdrawAmountExceedsBalance,

    // === System ===
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal system error: {0}")]
    System(String),
}

impl LedgerError {
    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::CurrencyNotFound(_) => "CURRENCY_NOT_FOUND",
            LedgerError::WalletNotFound => "WALLET_NOT_FOUND",
            LedgerError::WalletOwnerNotFound(_) => "WALLET_OWNER_NOT_FOUND",
            LedgerError::WithdrawNotFound(_) => "WITHDRAW_NOT_FOUND",
            LedgerError::ReservationNotFound(_) => "RESERVATION_NOT_FOUND",
            LedgerError::RateNotFound { .. } => "RATE_NOT_FOUND",
            LedgerError::WithdrawAlreadyProcessed => "WITHDRAW_ALREADY_PROCESSED",
            LedgerError::WithdrawCannotBeCanceled => "WITHDRAW_CANNOT_BE_CANCELED",
            LedgerError::WithdrawCannotBeRejected => "WITHDRAW_CANNOT_BE_REJECTED",
            LedgerError::InvalidReservation(_) => "INVALID_RESERVE_NUMBER",
            LedgerError::DuplicateTransferRef(_) => "DUPLICATE_TRANSFER_REF",
            LedgerError::InsufficientFunds => "INSUFFICIENT_BALANCE",
            LedgerError::InsufficientSystemLiquidity => "SYSTEM_ASSETS_NOT_ENOUGH",
            LedgerError::Forbidden => "FORBIDDEN",
            LedgerError::InvalidCashoutUsage => "INVALID_CASHOUT_USAGE",
            LedgerError::NoConversionPath { .. } => "NOT_EXCHANGEABLE_CURRENCIES",
            LedgerError::Contention { .. } => "WALLET_CONTENTION",
            LedgerError::InvalidAmount => "INVALID_AMOUNT",
            LedgerError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            LedgerError::CurrencyInactive(_) => "CURRENCY_INACTIVE",
            LedgerError::WalletAlreadyExists => "WALLET_ALREADY_EXISTS",
            LedgerError::RateAlreadyExists { .. } => "PAIR_IS_EXIST",
            LedgerError::InvalidRate => "INVALID_RATE",
            LedgerError::SameWallet => "SAME_WALLET",
            LedgerError::WithdrawNotAllowed => "WITHDRAW_NOT_ALLOWED",
            LedgerError::AmountBelowMinimum => "WITHDRAW_AMOUNT_LESS_THAN_MINIMUM",
            LedgerError::WithdrawAmountExceedsBalance => "WITHDRAW_AMOUNT_EXCEEDS_WALLET_BALANCE",
            LedgerError::Database(_) => "DATABASE_ERROR",
            LedgerError::System(_) => "SYSTEM_ERROR",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::CurrencyNotFound(_)
            | LedgerError::WalletNotFound
            | LedgerError::WalletOwnerNotFound(_)
            | LedgerError::WithdrawNotFound(_)
            | LedgerError::ReservationNotFound(_)
            | LedgerError::RateNotFound { .. } => ErrorKind::NotFound,
            LedgerError::WithdrawAlreadyProcessed
            | LedgerError::WithdrawCannotBeCanceled
            | LedgerError::WithdrawCannotBeRejected
            | LedgerError::InvalidReservation(_)
            | LedgerError::DuplicateTransferRef(_) => ErrorKind::InvalidState,
            LedgerError::InsufficientFunds | LedgerError::InsufficientSystemLiquidity => {
                ErrorKind::InsufficientFunds
            }
            LedgerError::Forbidden | LedgerError::InvalidCashoutUsage => ErrorKind::Forbidden,
            LedgerError::NoConversionPath { .. } => ErrorKind::NoConversionPath,
            LedgerError::Contention { .. } => ErrorKind::Contention,
            LedgerError::InvalidAmount
            | LedgerError::CurrencyMismatch { .. }
            | LedgerError::CurrencyInactive(_)
            | LedgerError::WalletAlreadyExists
            | LedgerError::RateAlreadyExists { .. }
            | LedgerError::InvalidRate
            | LedgerError::SameWallet
            | LedgerError::WithdrawNotAllowed
            | LedgerError::AmountBelowMinimum
            | LedgerError::WithdrawAmountExceedsBalance => ErrorKind::Invalid,
            LedgerError::Database(_) | LedgerError::System(_) => ErrorKind::Internal,
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidState => 409,
            ErrorKind::InsufficientFunds | ErrorKind::NoConversionPath => 422,
            ErrorKind::Forbidden => 403,
            ErrorKind::Invalid => 400,
            ErrorKind::Contention => 503,
            ErrorKind::Internal => 500,
        }
    }

    /// Only contention is safe to retry as a whole operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Contention { .. })
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Database(e.to_string())
    }
}

impl From<anyhow::Error> for LedgerError {
    fn from(e: anyhow::Error) -> Self {
        LedgerError::System(e.to_string())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
