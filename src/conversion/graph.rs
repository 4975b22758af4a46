//! Conversion graph snapshot and lazy route search
//!
//! Nodes are active currencies, edges are rates minus forbidden pairs. A
//! path is valid when every interior node is transitive and no node repeats.
//! Neighbors are visited in lexical order so results are reproducible.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

use super::models::{ForbiddenPair, Rate, Route, RoutePolicy};
use crate::currency::Currency;

/// Default hop bound for route enumeration
pub const DEFAULT_MAX_HOPS: usize = 4;

#[derive(Debug, Clone)]
struct Edge {
    from: String,
    to: String,
    rate: Decimal,
}

/// Immutable routing view built from currencies, rates and forbidden pairs
#[derive(Debug, Clone, Default)]
pub struct ConversionGraph {
    nodes: BTreeSet<String>,
    transitive: BTreeSet<String>,
    adjacency: BTreeMap<String, Vec<Edge>>,
    max_hops: usize,
}

impl ConversionGraph {
    pub fn build(
        currencies: &[Currency],
        rates: &[Rate],
        forbidden: &[ForbiddenPair],
        max_hops: usize,
    ) -> Self {
        let nodes: BTreeSet<String> = currencies
            .iter()
            .filter(|c| c.is_active)
            .map(|c| c.symbol.clone())
            .collect();
        let transitive = currencies
            .iter()
            .filter(|c| c.is_active && c.is_transitive)
            .map(|c| c.symbol.clone())
            .collect();
        let forbidden: BTreeSet<(&str, &str)> = forbidden
            .iter()
            .map(|p| (p.source_symbol.as_str(), p.dest_symbol.as_str()))
            .collect();

        let mut adjacency: BTreeMap<String, Vec<Edge>> = BTreeMap::new();
        for rate in rates {
            if rate.rate <= Decimal::ZERO
                || rate.source_symbol == rate.dest_symbol
                || !nodes.contains(&rate.source_symbol)
                || !nodes.contains(&rate.dest_symbol)
                || forbidden.contains(&(rate.source_symbol.as_str(), rate.dest_symbol.as_str()))
            {
                continue;
            }
            adjacency
                .entry(rate.source_symbol.clone())
                .or_default()
                .push(Edge {
                    from: rate.source_symbol.clone(),
                    to: rate.dest_symbol.clone(),
                    rate: rate.rate,
                });
        }
        for edges in adjacency.values_mut() {
            edges.sort_by(|a, b| a.to.cmp(&b.to));
            edges.dedup_by(|a, b| a.to == b.to);
        }

        Self {
            nodes,
            transitive,
            adjacency,
            max_hops: max_hops.max(1),
        }
    }

    pub fn max_hops(&self) -> usize {
        self.max_hops
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.nodes.contains(symbol)
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(Vec::len).sum()
    }

    fn edges(&self, symbol: &str) -> &[Edge] {
        self.adjacency.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    fn is_transitive(&self, symbol: &str) -> bool {
        self.transitive.contains(symbol)
    }

    /// Lazy sequence of candidate routes, best first under `policy`
    pub fn routes<'g>(&'g self, source: &str, dest: &str, policy: RoutePolicy) -> Routes<'g> {
        let mode = if !self.contains(source) || !self.contains(dest) {
            Mode::Done
        } else if source == dest {
            Mode::Identity(source.to_string())
        } else {
            match policy {
                RoutePolicy::DepthFirst => {
                    Mode::Search(PathSearch::new(self, source, dest, self.max_hops, false))
                }
                RoutePolicy::ShortestHops => Mode::Deepening {
                    depth: 1,
                    search: PathSearch::new(self, source, dest, 1, true),
                },
            }
        };
        Routes { mode }
    }
}

/// Iterator over routes; see [`ConversionGraph::routes`]
pub struct Routes<'g> {
    mode: Mode<'g>,
}

enum Mode<'g> {
    Done,
    Identity(String),
    Search(PathSearch<'g>),
    Deepening { depth: usize, search: PathSearch<'g> },
}

impl Iterator for Routes<'_> {
    type Item = Route;

    fn next(&mut self) -> Option<Route> {
        loop {
            match &mut self.mode {
                Mode::Done => return None,
                Mode::Identity(symbol) => {
                    let route = Route::identity(std::mem::take(symbol));
                    self.mode = Mode::Done;
                    return Some(route);
                }
                Mode::Search(search) => {
                    let next = search.next();
                    if next.is_none() {
                        self.mode = Mode::Done;
                    }
                    return next;
                }
                Mode::Deepening { depth, search } => {
                    if let Some(route) = search.next() {
                        return Some(route);
                    }
                    if *depth >= search.graph.max_hops {
                        self.mode = Mode::Done;
                        return None;
                    }
                    *depth += 1;
                    *search = search.restart(*depth);
                }
            }
        }
    }
}

struct Frame<'g> {
    node: &'g str,
    next: usize,
}

/// Iterative DFS over simple paths
///
/// `exact` restricts yielded paths to exactly `max_len` hops.
struct PathSearch<'g> {
    graph: &'g ConversionGraph,
    source: String,
    dest: String,
    max_len: usize,
    exact: bool,
    stack: Vec<Frame<'g>>,
    path: Vec<&'g Edge>,
}

impl<'g> PathSearch<'g> {
    fn new(graph: &'g ConversionGraph, source: &str, dest: &str, max_len: usize, exact: bool) -> Self {
        let root = graph.nodes.get(source).map(String::as_str);
        Self {
            graph,
            source: source.to_string(),
            dest: dest.to_string(),
            max_len,
            exact,
            stack: root.map(|node| Frame { node, next: 0 }).into_iter().collect(),
            path: Vec::new(),
        }
    }

    fn restart(&self, max_len: usize) -> Self {
        Self::new(self.graph, &self.source, &self.dest, max_len, self.exact)
    }

    fn on_path(&self, symbol: &str) -> bool {
        self.stack.iter().any(|f| f.node == symbol)
    }

    fn route_with(&self, last: &'g Edge) -> Option<Route> {
        let edges = self
            .path
            .iter()
            .copied()
            .chain(std::iter::once(last))
            .map(|e| Rate::new(e.from.clone(), e.to.clone(), e.rate))
            .collect();
        Route::from_edges(edges)
    }
}

impl Iterator for PathSearch<'_> {
    type Item = Route;

    fn next(&mut self) -> Option<Route> {
        let graph = self.graph;
        loop {
            let (node, idx) = {
                let frame = self.stack.last_mut()?;
                let idx = frame.next;
                frame.next += 1;
                (frame.node, idx)
            };

            let Some(edge) = graph.edges(node).get(idx) else {
                self.stack.pop();
                self.path.pop();
                continue;
            };

            if self.on_path(&edge.to) {
                continue;
            }

            let hops = self.path.len() + 1;
            if edge.to == self.dest {
                if self.exact && hops != self.max_len {
                    continue;
                }
                match self.route_with(edge) {
                    Some(route) => return Some(route),
                    // Composite overflow: not a usable route
                    None => continue,
                }
            }

            if hops >= self.max_len || !graph.is_transitive(&edge.to) {
                continue;
            }
            self.path.push(edge);
            self.stack.push(Frame {
                node: &edge.to,
                next: 0,
            });
        }
    }
}
