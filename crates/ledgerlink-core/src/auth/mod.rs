//! Authentication module for managing the session lifecycle.
//!
//! This module provides:
//! - `SessionManager`: state machine, login, handshake completion, refresh-and-retry
//! - `SessionData`: the token pair and user, with validated persistence
//! - `SessionStore`: tab-scoped key/value storage (`MemoryStore`, `FileStore`)
//!
//! Only standalone sessions are restored from storage; embedded sessions are
//! always obtained fresh from the parent frame.

pub mod manager;
pub mod session;
pub mod store;

pub use manager::{Credential, SessionManager};
pub use session::{
    SessionData, SessionEvent, SessionState, TokenPair, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY,
};
pub use store::{FileStore, MemoryStore, SessionStore};
