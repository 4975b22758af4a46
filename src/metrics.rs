//! Ledger counters
//!
//! Fire-and-forget: a sink never reports failure back to the caller.

use dashmap::DashMap;
use tracing::debug;

pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &'static str);
}

/// Emits counters as debug-level trace events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn increment(&self, name: &'static str) {
        debug!(metric = name, "counter");
    }
}

/// In-memory counters, readable back in tests and health output
#[derive(Debug, Default)]
pub struct CountingMetrics {
    counters: DashMap<&'static str, u64>,
}

impl CountingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters.get(name).map(|c| *c).unwrap_or(0)
    }

    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        let mut out: Vec<_> = self.counters.iter().map(|e| (*e.key(), *e.value())).collect();
        out.sort();
        out
    }
}

impl MetricsSink for CountingMetrics {
    fn increment(&self, name: &'static str) {
        *self.counters.entry(name).or_insert(0) += 1;
    }
}
