//! Rate graph models

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LedgerError, LedgerResult};

/// Directed conversion edge: 1 `source_symbol` = `rate` `dest_symbol`
///
/// Edges are not assumed symmetric; the reverse direction is its own rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate {
    pub source_symbol: String,
    pub dest_symbol: String,
    pub rate: Decimal,
}

impl Rate {
    pub fn new(source_symbol: impl Into<String>, dest_symbol: impl Into<String>, rate: Decimal) -> Self {
        Self {
            source_symbol: source_symbol.into(),
            dest_symbol: dest_symbol.into(),
            rate,
        }
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.rate <= Decimal::ZERO {
            return Err(LedgerError::InvalidRate);
        }
        if self.source_symbol == self.dest_symbol {
            return Err(LedgerError::InvalidRate);
        }
        Ok(())
    }
}

/// Directed pair excluded from routing even when a rate exists
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ForbiddenPair {
    pub source_symbol: String,
    pub dest_symbol: String,
}

impl ForbiddenPair {
    pub fn new(source_symbol: impl Into<String>, dest_symbol: impl Into<String>) -> Self {
        Self {
            source_symbol: source_symbol.into(),
            dest_symbol: dest_symbol.into(),
        }
    }
}

/// Order in which candidate routes are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutePolicy {
    /// Fewest hops first; equal hop counts in lexical symbol order
    #[default]
    ShortestHops,
    /// Depth-first over lexically ordered neighbors, first found first
    DepthFirst,
}

impl fmt::Display for RoutePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutePolicy::ShortestHops => write!(f, "shortest_hops"),
            RoutePolicy::DepthFirst => write!(f, "depth_first"),
        }
    }
}

/// One candidate path through the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    source_symbol: String,
    dest_symbol: String,
    edges: Vec<Rate>,
    rate: Decimal,
}

impl Route {
    /// Zero-hop route from a currency to itself
    pub fn identity(symbol: impl Into<String>) -> Self {
        let symbol = symbol.into();
        Self {
            source_symbol: symbol.clone(),
            dest_symbol: symbol,
            edges: Vec::new(),
            rate: Decimal::ONE,
        }
    }

    /// `None` if the composite rate overflows
    pub fn from_edges(edges: Vec<Rate>) -> Option<Self> {
        let first = edges.first()?;
        let last = edges.last()?;
        let rate = edges
            .iter()
            .try_fold(Decimal::ONE, |acc, e| acc.checked_mul(e.rate))?;
        Some(Self {
            source_symbol: first.source_symbol.clone(),
            dest_symbol: last.dest_symbol.clone(),
            edges,
            rate,
        })
    }

    pub fn source_symbol(&self) -> &str {
        &self.source_symbol
    }

    pub fn dest_symbol(&self) -> &str {
        &self.dest_symbol
    }

    pub fn edges(&self) -> &[Rate] {
        &self.edges
    }

    pub fn hops(&self) -> usize {
        self.edges.len()
    }

    /// Product of edge rates in traversal order
    pub fn rate(&self) -> Decimal {
        self.rate
    }

    /// Symbols visited, endpoints included
    pub fn symbols(&self) -> Vec<&str> {
        let mut out = vec![self.source_symbol.as_str()];
        out.extend(self.edges.iter().map(|e| e.dest_symbol.as_str()));
        out
    }

    /// The route collapsed to a single source→dest rate
    pub fn as_rate(&self) -> Rate {
        Rate::new(self.source_symbol.clone(), self.dest_symbol.clone(), self.rate)
    }
}
