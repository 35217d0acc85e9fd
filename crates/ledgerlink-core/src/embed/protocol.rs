//! Cross-frame message protocol.
//!
//! Messages are JSON objects discriminated by a `type` field. Inbound payloads
//! are only parsed after their origin has passed the allow-list.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AuthError;
use crate::models::User;

/// Raw inbound event from the messaging channel, before any validation.
#[derive(Debug, Clone)]
pub struct FrameEvent {
    pub origin: String,
    pub data: Value,
}

impl FrameEvent {
    pub fn new(origin: impl Into<String>, data: Value) -> Self {
        Self {
            origin: origin.into(),
            data,
        }
    }
}

/// Parent-to-child messages. Unknown types parse as `Unknown` and are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundMessage {
    JwtTokenResponse {
        #[serde(default)]
        token: Option<String>,
        #[serde(default, rename = "refreshToken")]
        refresh_token: Option<String>,
        #[serde(default)]
        user: Option<User>,
        #[serde(default)]
        error: Option<String>,
    },
    RefreshBalance,
    ClearStorage,
    ClearSession,
    GetStatus,
    #[serde(other)]
    Unknown,
}

/// Child-to-parent messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    RequestJwtToken {
        timestamp: i64,
    },
    CreditSystemReady {
        user: User,
        timestamp: i64,
    },
    StatusResponse {
        #[serde(rename = "isAuthenticated")]
        is_authenticated: bool,
        user: Option<User>,
        balance: Option<i64>,
        timestamp: i64,
    },
    /// Sent once the handshake has given up, asking the parent to reload the frame.
    RequestIframeReload {
        attempts: u32,
        timestamp: i64,
    },
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Outbound channel to the parent frame. Posting is broadcast at the origin
/// level; only inbound traffic is origin-checked.
pub trait ParentPort: Send + Sync {
    fn post_message(&self, message: &OutboundMessage) -> anyhow::Result<()>;
}

/// Exact-match origin allow-list. A trailing `/` is ignored on both sides.
#[derive(Debug, Clone, Default)]
pub struct OriginAllowList {
    origins: Vec<String>,
}

fn normalize(origin: &str) -> &str {
    origin.trim().trim_end_matches('/')
}

impl OriginAllowList {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            origins: origins
                .into_iter()
                .map(|o| normalize(o.as_ref()).to_string())
                .filter(|o| !o.is_empty())
                .collect(),
        }
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        let origin = normalize(origin);
        !origin.is_empty() && self.origins.iter().any(|o| o == origin)
    }

    pub fn check(&self, origin: &str) -> Result<(), AuthError> {
        if self.is_allowed(origin) {
            Ok(())
        } else {
            Err(AuthError::OriginRejected(origin.to_string()))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_token_response() {
        let msg: InboundMessage = serde_json::from_value(json!({
            "type": "JWT_TOKEN_RESPONSE",
            "token": "acc",
            "refreshToken": "ref",
            "user": {"id": 1, "email": "a@example.com"}
        }))
        .unwrap();
        match msg {
            InboundMessage::JwtTokenResponse {
                token,
                refresh_token,
                user,
                error,
            } => {
                assert_eq!(token.as_deref(), Some("acc"));
                assert_eq!(refresh_token.as_deref(), Some("ref"));
                assert_eq!(user.unwrap().id, "1");
                assert!(error.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_response() {
        let msg: InboundMessage = serde_json::from_value(json!({
            "type": "JWT_TOKEN_RESPONSE",
            "error": "User not signed in"
        }))
        .unwrap();
        assert_eq!(
            msg,
            InboundMessage::JwtTokenResponse {
                token: None,
                refresh_token: None,
                user: None,
                error: Some("User not signed in".to_string())
            }
        );
    }

    #[test]
    fn test_control_and_unknown_types() {
        let parse = |v: Value| serde_json::from_value::<InboundMessage>(v).unwrap();
        assert_eq!(parse(json!({"type": "REFRESH_BALANCE"})), InboundMessage::RefreshBalance);
        assert_eq!(parse(json!({"type": "CLEAR_STORAGE"})), InboundMessage::ClearStorage);
        assert_eq!(parse(json!({"type": "CLEAR_SESSION"})), InboundMessage::ClearSession);
        assert_eq!(parse(json!({"type": "GET_STATUS"})), InboundMessage::GetStatus);
        assert_eq!(parse(json!({"type": "SOMETHING_NEW", "x": 1})), InboundMessage::Unknown);
    }

    #[test]
    fn test_outbound_wire_shape() {
        let json = serde_json::to_value(OutboundMessage::RequestJwtToken { timestamp: 5 }).unwrap();
        assert_eq!(json, json!({"type": "REQUEST_JWT_TOKEN", "timestamp": 5}));

        let json = serde_json::to_value(OutboundMessage::StatusResponse {
            is_authenticated: false,
            user: None,
            balance: None,
            timestamp: 9,
        })
        .unwrap();
        assert_eq!(json["type"], "STATUS_RESPONSE");
        assert_eq!(json["isAuthenticated"], false);

        let json = serde_json::to_value(OutboundMessage::RequestIframeReload { attempts: 3, timestamp: 1 }).unwrap();
        assert_eq!(json["type"], "REQUEST_IFRAME_RELOAD");
    }

    #[test]
    fn test_origin_allow_list() {
        let allow = OriginAllowList::new(["https://host.example/", "http://localhost:3000"]);
        assert!(allow.is_allowed("https://host.example"));
        assert!(allow.is_allowed("https://host.example/"));
        assert!(allow.is_allowed("http://localhost:3000"));
        assert!(!allow.is_allowed("https://evil.example"));
        assert!(!allow.is_allowed("https://host.example.evil.example"));
        assert!(!allow.is_allowed("http://host.example"));
        assert!(!allow.is_allowed(""));
        assert_eq!(
            allow.check("null"),
            Err(AuthError::OriginRejected("null".to_string()))
        );
    }

    #[test]
    fn test_empty_allow_list_rejects_everything() {
        let allow = OriginAllowList::new(Vec::<String>::new());
        assert!(allow.is_empty());
        assert!(!allow.is_allowed("https://host.example"));
    }
}
