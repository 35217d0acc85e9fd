//! Core library for ledgerlink.
//!
//! This crate authenticates a client against a credit ledger backend and exposes
//! balance, spend, add, and paginated-history operations. It runs in one of two modes:
//!
//! - **Embedded**: hosted inside a trusted parent frame, which hands over credentials
//!   through the cross-frame handshake (`embed::FrameBridge`).
//! - **Standalone**: top-level, logging the user in directly (`auth::SessionManager::login`).
//!
//! Modules:
//! - `mode`: one-shot embedded/standalone detection
//! - `auth`: session state machine, token refresh, session persistence
//! - `embed`: cross-frame message protocol and handshake
//! - `ledger`: ledger operations and the cached balance
//! - `api`: HTTP contract with the backend, behind the `Transport` trait
//! - `models`: user and transaction records
//! - `system`: the `CreditSystem` facade wiring everything together

pub mod api;
pub mod auth;
pub mod config;
pub mod embed;
pub mod error;
pub mod ledger;
pub mod mode;
pub mod models;
pub mod system;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
pub use error::{Error, ErrorReport, Outcome, Result};
pub use mode::Mode;
pub use system::{CreditSystem, Snapshot};
