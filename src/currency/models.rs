//! Currency model

use serde::{Deserialize, Serialize};

/// Currency definition (BTC, USDT, etc.)
///
/// Symbols are never reused: once a posting references a symbol, edits only
/// touch metadata and flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    pub symbol: String,
    pub name: String,
    /// Number of fractional digits accepted for amounts
    pub precision: u32,
    pub is_transitive: bool,
    pub is_active: bool,
}

impl Currency {
    pub fn new(symbol: impl Into<String>, name: impl Into<String>, precision: u32) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            precision,
            is_transitive: false,
            is_active: true,
        }
    }

    pub fn transitive(mut self) -> Self {
        self.is_transitive = true;
        self
    }
}
