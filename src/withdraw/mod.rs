//! Withdrawal State Machine
//!
//! Drives a withdraw request through staged custody in a CASHOUT wallet.
//! Only this module holds the capability to post against CASHOUT wallets.

pub mod models;
pub mod policy;
pub mod service;
pub mod store;

pub use models::{
    ManualWithdrawCommand, NewWithdraw, Withdraw, WithdrawAcceptCommand, WithdrawActionResult,
    WithdrawCommand, WithdrawCriteria, WithdrawHistoryQuery, WithdrawRejectCommand, WithdrawStatus,
    WithdrawType, WithdrawUpdate,
};
pub use policy::{StaticWithdrawPolicies, WithdrawPolicy, WithdrawPolicyEntry, WithdrawPolicyProvider};
pub use service::WithdrawService;
pub use store::{InMemoryWithdrawStore, WithdrawStore};
