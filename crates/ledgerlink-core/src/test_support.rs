//! Scripted collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::api::{ApiRequest, ApiResponse, Transport};
use crate::config::Config;
use crate::embed::{OutboundMessage, ParentPort};
use crate::error::NetworkError;
use crate::models::User;

/// Transport that answers from per-route queues keyed by `"METHOD /path"`.
/// Every call yields once before answering so concurrent callers interleave.
#[derive(Default)]
pub(crate) struct MockTransport {
    routes: Mutex<HashMap<String, VecDeque<ApiResponse>>>,
    holds: Mutex<HashMap<String, Arc<Notify>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

fn route_key(method: &str, url: &str) -> String {
    let path = reqwest::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    format!("{} {}", method, path)
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, method: &str, path: &str, status: u16, body: Value) {
        self.push_raw(method, path, status, &body.to_string());
    }

    pub fn push_raw(&self, method: &str, path: &str, status: u16, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .entry(format!("{} {}", method, path))
            .or_default()
            .push_back(ApiResponse {
                status,
                body: body.to_string(),
            });
    }

    /// Make calls to this route wait until the returned `Notify` fires.
    pub fn hold(&self, method: &str, path: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.holds
            .lock()
            .unwrap()
            .insert(format!("{} {}", method, path), notify.clone());
        notify
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, method: &str, path: &str) -> Vec<ApiRequest> {
        let key = format!("{} {}", method, path);
        self.requests()
            .into_iter()
            .filter(|r| route_key(r.method.as_str(), &r.url) == key)
            .collect()
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        self.requests_to(method, path).len()
    }

    /// Yield until at least one request to the route has been made.
    pub async fn wait_for(&self, method: &str, path: &str) {
        while self.count(method, path) == 0 {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, NetworkError> {
        let key = route_key(request.method.as_str(), &request.url);
        self.requests.lock().unwrap().push(request);
        let response = self
            .routes
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(|queue| queue.pop_front());
        let hold = self.holds.lock().unwrap().get(&key).cloned();

        tokio::task::yield_now().await;
        if let Some(hold) = hold {
            hold.notified().await;
        }

        response.ok_or_else(|| NetworkError::Unreachable(format!("no scripted response for {}", key)))
    }
}

/// Parent port that records every outbound message.
#[derive(Default)]
pub(crate) struct RecordingPort {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingPort {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&OutboundMessage) -> bool) -> usize {
        self.sent().iter().filter(|m| pred(m)).count()
    }
}

impl ParentPort for RecordingPort {
    fn post_message(&self, message: &OutboundMessage) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

pub(crate) const PARENT_ORIGIN: &str = "https://host.example";

pub(crate) fn test_config() -> Config {
    Config {
        api_base_url: "http://api.test".to_string(),
        auth_url: "http://auth.test".to_string(),
        allowed_origins: vec![PARENT_ORIGIN.to_string()],
        ..Config::default()
    }
}

pub(crate) fn test_user() -> User {
    User {
        id: "42".to_string(),
        email: "ada@example.com".to_string(),
        name: Some("Ada".to_string()),
        organizations: None,
    }
}

pub(crate) fn user_json() -> Value {
    json!({"id": 42, "email": "ada@example.com", "name": "Ada"})
}

pub(crate) fn login_body(access: &str, refresh: &str) -> Value {
    json!({
        "success": true,
        "data": {
            "tokens": {"access_token": access, "refresh_token": refresh},
            "user": user_json()
        }
    })
}

pub(crate) fn balance_body(balance: i64) -> Value {
    json!({"success": true, "data": {"balance": balance}})
}

pub(crate) fn history_body(transactions: Value, total: u64) -> Value {
    json!({"success": true, "data": {"transactions": transactions, "pagination": {"total": total}}})
}
