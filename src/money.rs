//! Money Module
//!
//! `Amount` pairs a currency symbol with a `Decimal` value. Arithmetic
//! between amounts of different currencies fails fast with
//! [`LedgerError::CurrencyMismatch`].
//!
//! Client strings are parsed with [`parse_amount`], which applies the
//! currency's precision strictly: too many fractional digits is an error,
//! never a silent truncation.
//!
//! ```rust
//! use custody_ledger::money::{parse_amount, format_amount};
//!
//! let value = parse_amount("1.5", 8).unwrap();
//! assert_eq!(format_amount(value, 4), "1.5000");
//! ```

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::error::LedgerError;

// ============================================================================
// Error Types
// ============================================================================

/// Money parsing errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

impl From<MoneyError> for LedgerError {
    fn from(_: MoneyError) -> Self {
        LedgerError::InvalidAmount
    }
}

// ============================================================================
// Amount
// ============================================================================

/// A value in one currency
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Amount {
    currency: String,
    value: Decimal,
}

impl Amount {
    pub fn new(currency: impl Into<String>, value: Decimal) -> Self {
        Self {
            currency: currency.into(),
            value,
        }
    }

    pub fn zero(currency: impl Into<String>) -> Self {
        Self::new(currency, Decimal::ZERO)
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn value(&self) -> Decimal {
        self.value
    }

    pub fn is_positive(&self) -> bool {
        self.value > Decimal::ZERO
    }

    fn ensure_same_currency(&self, other: &Amount) -> Result<(), LedgerError> {
        if self.currency != other.currency {
            return Err(LedgerError::CurrencyMismatch {
                expected: self.currency.clone(),
                actual: other.currency.clone(),
            });
        }
        Ok(())
    }

    pub fn checked_add(&self, other: &Amount) -> Result<Amount, LedgerError> {
        self.ensure_same_currency(other)?;
        let value = self
            .value
            .checked_add(other.value)
            .ok_or_else(|| LedgerError::System("amount overflow".into()))?;
        Ok(Amount::new(self.currency.clone(), value))
    }

    pub fn checked_sub(&self, other: &Amount) -> Result<Amount, LedgerError> {
        self.ensure_same_currency(other)?;
        let value = self
            .value
            .checked_sub(other.value)
            .ok_or_else(|| LedgerError::System("amount overflow".into()))?;
        Ok(Amount::new(self.currency.clone(), value))
    }

    /// Convert into another currency with a composite rate
    pub fn convert(&self, dest_currency: impl Into<String>, rate: Decimal) -> Result<Amount, LedgerError> {
        let value = self
            .value
            .checked_mul(rate)
            .ok_or_else(|| LedgerError::System("conversion overflow".into()))?;
        Ok(Amount::new(dest_currency, value))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value.normalize(), self.currency)
    }
}

// ============================================================================
// Parse / Format
// ============================================================================

/// Parse a client amount string against a currency precision
///
/// # Errors
/// * `PrecisionOverflow` - more fractional digits than `precision`
/// * `InvalidAmount` - zero, negative or explicitly signed
/// * `InvalidFormat` - anything that is not `digits[.digits]`
pub fn parse_amount(amount_str: &str, precision: u32) -> Result<Decimal, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    if amount_str.starts_with('-') || amount_str.starts_with('+') {
        return Err(MoneyError::InvalidAmount);
    }

    let (whole, frac) = match amount_str.split_once('.') {
        None => (amount_str, ""),
        Some((whole, frac)) => {
            // ".5" and "5." are ambiguous
            if whole.is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing leading zero (e.g., use 0.5 instead of .5)".into(),
                ));
            }
            if frac.is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
                ));
            }
            if precision == 0 {
                return Err(MoneyError::InvalidFormat(
                    "precision is 0, but dot provided".into(),
                ));
            }
            (whole, frac)
        }
    };

    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(format!(
            "invalid character in amount: {}",
            amount_str
        )));
    }

    if frac.len() > precision as usize {
        return Err(MoneyError::PrecisionOverflow {
            provided: frac.len() as u32,
            max: precision,
        });
    }

    let value = Decimal::from_str(amount_str)
        .map_err(|e| MoneyError::InvalidFormat(e.to_string()))?;

    if value.is_zero() {
        return Err(MoneyError::InvalidAmount);
    }

    Ok(value)
}

/// Format a value with a fixed number of display decimals (truncating)
pub fn format_amount(value: Decimal, display_decimals: u32) -> String {
    let truncated = value.trunc_with_scale(display_decimals);
    format!("{:.prec$}", truncated, prec = display_decimals as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_amount_variations() {
        assert_eq!(parse_amount("1.23", 2).unwrap(), dec("1.23"));
        assert_eq!(parse_amount("001.23", 8).unwrap(), dec("1.23"));
        assert_eq!(parse_amount("0.0001", 4).unwrap(), dec("0.0001"));
        assert_eq!(parse_amount("100", 0).unwrap(), dec("100"));

        assert!(parse_amount("0", 2).is_err());
        assert!(parse_amount("0.00", 2).is_err());
    }

    #[test]
    fn test_parse_amount_invalid_formats() {
        for case in ["1,000.00", "1.2.3", "1. 23", "+1.23", "-1", "1e2", "0x12", ".", ".5", "5."] {
            assert!(parse_amount(case, 8).is_err(), "Should reject: {}", case);
        }
        assert!(parse_amount("100.0", 0).is_err());
    }

    #[test]
    fn test_parse_amount_precision_limits() {
        assert!(parse_amount("1.234", 3).is_ok());
        assert_eq!(
            parse_amount("1.2345", 3),
            Err(MoneyError::PrecisionOverflow {
                provided: 4,
                max: 3
            })
        );
    }

    #[test]
    fn test_format_amount_truncates() {
        assert_eq!(format_amount(dec("1.999"), 2), "1.99");
        assert_eq!(format_amount(dec("1.5"), 4), "1.5000");
        assert_eq!(format_amount(dec("1.999"), 0), "1");
    }

    #[test]
    fn test_amount_arithmetic_same_currency() {
        let a = Amount::new("USDT", dec("10.5"));
        let b = Amount::new("USDT", dec("0.5"));
        assert_eq!(a.checked_add(&b).unwrap().value(), dec("11"));
        assert_eq!(a.checked_sub(&b).unwrap().value(), dec("10"));
    }

    #[test]
    fn test_amount_arithmetic_cross_currency_fails() {
        let a = Amount::new("USDT", dec("10"));
        let b = Amount::new("BTC", dec("1"));
        assert!(matches!(
            a.checked_add(&b),
            Err(LedgerError::CurrencyMismatch { .. })
        ));
        assert!(matches!(
            a.checked_sub(&b),
            Err(LedgerError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn test_amount_convert() {
        let eth = Amount::new("ETH", dec("10"));
        let usdt = eth.convert("USDT", dec("200")).unwrap();
        assert_eq!(usdt.currency(), "USDT");
        assert_eq!(usdt.value(), dec("2000"));
        assert_eq!(usdt.to_string(), "2000 USDT");
    }
}
