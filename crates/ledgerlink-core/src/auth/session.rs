use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::store::SessionStore;
use crate::models::User;

/// Storage keys. Shared by both modes so everything downstream is mode-agnostic.
pub const ACCESS_TOKEN_KEY: &str = "ledgerlink.accessToken";
pub const REFRESH_TOKEN_KEY: &str = "ledgerlink.refreshToken";
pub const USER_KEY: &str = "ledgerlink.user";

/// Values that some hosts write instead of removing a key.
const PLACEHOLDER_VALUES: [&str; 3] = ["", "undefined", "null"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Uninitialized,
    AwaitingHandshake,
    HandshakeFailed,
    Unauthenticated,
    Authenticating,
    Authenticated,
    Refreshing,
    SessionExpired,
}

impl SessionState {
    /// States in which a token pair is held.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated | SessionState::Refreshing)
    }

    /// States from which a password login may start.
    pub fn can_login(&self) -> bool {
        matches!(
            self,
            SessionState::Uninitialized
                | SessionState::Unauthenticated
                | SessionState::SessionExpired
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::AwaitingHandshake => "awaiting_handshake",
            SessionState::HandshakeFailed => "handshake_failed",
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticating => "authenticating",
            SessionState::Authenticated => "authenticated",
            SessionState::Refreshing => "refreshing",
            SessionState::SessionExpired => "session_expired",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    /// Absent when the parent frame only handed over an access token.
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionData {
    pub tokens: TokenPair,
    pub user: User,
}

impl SessionData {
    /// Load a persisted session. Anything incomplete, placeholder-valued, or
    /// unparsable is purged and reported as absent.
    pub fn load(store: &dyn SessionStore) -> Option<Self> {
        let access_token = read_value(store, ACCESS_TOKEN_KEY);
        let refresh_token = read_value(store, REFRESH_TOKEN_KEY);
        let user_raw = read_value(store, USER_KEY);

        let (access_token, user_raw) = match (access_token, user_raw) {
            (Some(token), Some(user)) => (token, user),
            (None, None) if refresh_token.is_none() => return None,
            _ => {
                debug!("Persisted session is incomplete, purging");
                Self::purge(store);
                return None;
            }
        };

        let user: User = match serde_json::from_str(&user_raw) {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "Persisted user is malformed, purging session");
                Self::purge(store);
                return None;
            }
        };
        if !user.is_well_formed() {
            warn!("Persisted user is missing id or email, purging session");
            Self::purge(store);
            return None;
        }

        Some(Self {
            tokens: TokenPair {
                access_token,
                refresh_token,
            },
            user,
        })
    }

    pub fn save(&self, store: &dyn SessionStore) -> Result<()> {
        store.set(ACCESS_TOKEN_KEY, &self.tokens.access_token)?;
        match self.tokens.refresh_token {
            Some(ref refresh) => store.set(REFRESH_TOKEN_KEY, refresh)?,
            None => store.remove(REFRESH_TOKEN_KEY)?,
        }
        store.set(USER_KEY, &serde_json::to_string(&self.user)?)?;
        Ok(())
    }

    /// Remove every session key. Failures are logged; clearing never blocks logout.
    pub fn purge(store: &dyn SessionStore) {
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY] {
            if let Err(e) = store.remove(key) {
                warn!(key = key, error = %e, "Failed to remove persisted session value");
            }
        }
    }
}

fn read_value(store: &dyn SessionStore, key: &str) -> Option<String> {
    let value = store.get(key)?;
    if PLACEHOLDER_VALUES.contains(&value.trim()) {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::MemoryStore;
    use crate::test_support::test_user;

    fn session() -> SessionData {
        SessionData {
            tokens: TokenPair {
                access_token: "acc".to_string(),
                refresh_token: Some("ref".to_string()),
            },
            user: test_user(),
        }
    }

    #[test]
    fn test_save_and_load() {
        let store = MemoryStore::new();
        session().save(&store).unwrap();
        assert_eq!(SessionData::load(&store), Some(session()));
    }

    #[test]
    fn test_missing_refresh_token_is_allowed() {
        let store = MemoryStore::new();
        let mut data = session();
        data.tokens.refresh_token = None;
        data.save(&store).unwrap();

        let loaded = SessionData::load(&store).unwrap();
        assert_eq!(loaded.tokens.refresh_token, None);
    }

    #[test]
    fn test_undefined_placeholder_is_absent_and_purged() {
        let store = MemoryStore::new();
        store.set(ACCESS_TOKEN_KEY, "undefined").unwrap();
        store.set(REFRESH_TOKEN_KEY, "ref").unwrap();
        store.set(USER_KEY, r#"{"id": 1, "email": "a@example.com"}"#).unwrap();

        assert_eq!(SessionData::load(&store), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_malformed_user_is_purged() {
        let store = MemoryStore::new();
        store.set(ACCESS_TOKEN_KEY, "acc").unwrap();
        store.set(USER_KEY, "{broken").unwrap();

        assert_eq!(SessionData::load(&store), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_user_without_email_is_purged() {
        let store = MemoryStore::new();
        store.set(ACCESS_TOKEN_KEY, "acc").unwrap();
        store.set(USER_KEY, r#"{"id": 1, "email": ""}"#).unwrap();

        assert_eq!(SessionData::load(&store), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_empty_store_is_absent() {
        let store = MemoryStore::new();
        assert_eq!(SessionData::load(&store), None);
    }

    #[test]
    fn test_state_predicates() {
        assert!(SessionState::Refreshing.is_authenticated());
        assert!(!SessionState::AwaitingHandshake.is_authenticated());
        assert!(SessionState::SessionExpired.can_login());
        assert!(!SessionState::Authenticated.can_login());
    }
}
