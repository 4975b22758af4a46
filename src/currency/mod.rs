//! Currency Registry
//!
//! Canonical set of tradeable currencies. A currency flagged transitive may be
//! used as an intermediate hop by the conversion graph.

pub mod models;
pub mod registry;

pub use models::Currency;
pub use registry::{CurrencyProvider, InMemoryCurrencyRegistry, require_active_currency};
