//! Transfer Engine and posting log types

pub mod engine;
pub mod types;

pub use engine::{CustodyAccess, TransferEngine};
pub use types::{
    Page, TransferCategory, TransferCommand, TransferId, TransferQuery, TransferRecord,
    TransferResult,
};
