//! Ledger client module.
//!
//! `LedgerClient` issues the authenticated balance/spend/add/history calls and
//! keeps `LedgerState`, a non-authoritative cache of the last known balance
//! and history page.

pub mod client;
pub mod state;

pub use client::LedgerClient;
pub use state::{BalanceReport, LedgerState, MutationReceipt};
