//! Cashier - Withdrawal Processing & Ledger Reservation Engine
//!
//! Moves a player session's balance between available, reserved, and
//! confirmed-withdrawn states while coordinating with an asynchronous,
//! failure-prone external settlement network. Funds are never created,
//! destroyed, or double-spent across retries, partial failures, manual
//! admin intervention, and duplicate client requests.
//!
//! Layering, leaves first:
//!
//! - [`ledger`] - atomic reserve/release/credit on session accounts
//! - [`settlement`] - interface to the external node plus fault classifier
//! - [`withdrawal`] - request handler, status poller, retry policy,
//!   approval gate
//! - [`api`] - HTTP surface for players and operators

pub mod api;
pub mod config;
pub mod errors;
pub mod hooks;
pub mod ledger;
pub mod settlement;
pub mod storage;
pub mod withdrawal;

pub use config::CashierConfig;
pub use errors::{CashierError, CashierResult};
pub use withdrawal::WithdrawalEngine;
