//! Owner-level transfer operations

pub mod service;

pub use service::{TransferRequest, TransferService};
