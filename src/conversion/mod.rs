//! Conversion Graph
//!
//! Directed currency-pair rates, forbidden pairs and transitive hops,
//! composed into multi-hop routes.

pub mod graph;
pub mod models;
pub mod service;
pub mod store;

pub use graph::{ConversionGraph, DEFAULT_MAX_HOPS, Routes};
pub use models::{ForbiddenPair, Rate, Route, RoutePolicy};
pub use service::GraphService;
pub use store::{InMemoryRateStore, RateStore};
