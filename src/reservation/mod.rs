//! Reserved conversions
//!
//! Two-phase cross-currency transfer: `reserve` locks the route rate for a
//! TTL, `advance` settles it through the system wallet.

pub mod models;
pub mod service;
pub mod store;
pub mod worker;

pub use models::{Leg, ReservationStatus, ReserveRequest, ReservedTransfer, SettlementIntent};
pub use service::{DEFAULT_RESERVATION_TTL_SECS, ReservationService};
pub use store::{InMemoryReservationStore, ReservationStore};
pub use worker::{ExpirySweeper, SettlementRecovery, WorkerConfig};
