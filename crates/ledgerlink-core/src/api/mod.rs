//! REST API client module for the credit ledger backend.
//!
//! This module provides the `ApiClient` for the login/refresh endpoints and the
//! authenticated balance, spend, add, and history endpoints. Requests go out
//! through a `Transport`, normally `HttpTransport` (reqwest).
//!
//! Authenticated calls take the bearer token as an argument; token ownership
//! stays with the session manager.

pub mod client;
pub mod transport;

pub use client::{ApiClient, HistoryPage, LoginGrant, RefreshGrant};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
