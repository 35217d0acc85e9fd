//! API client for the credit ledger backend.
//!
//! Every endpoint answers with an envelope `{success, data, message?}`. The
//! helpers below unwrap it, mapping a `success: false` body to
//! `NetworkError::Rejected` with the backend's own message.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use tracing::{debug, warn};

use super::transport::{ApiRequest, ApiResponse, Transport};
use crate::error::{AuthError, Error, NetworkError, Result};
use crate::models::{Transaction, TransactionType, User};

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: Option<bool>,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Error body shape used to pull a readable message out of failures.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    tokens: LoginTokens,
    user: User,
}

#[derive(Debug, Deserialize)]
struct LoginTokens {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshData {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BalanceData {
    balance: i64,
}

/// The backend has shipped three names for the post-mutation balance.
#[derive(Debug, Default, Deserialize)]
struct MutationData {
    #[serde(default)]
    new_balance: Option<i64>,
    #[serde(default)]
    updated_balance: Option<i64>,
    #[serde(default)]
    balance: Option<i64>,
}

impl MutationData {
    fn reported_balance(&self) -> Option<i64> {
        self.new_balance.or(self.updated_balance).or(self.balance)
    }
}

#[derive(Debug, Deserialize)]
struct HistoryData {
    #[serde(default)]
    transactions: Vec<Transaction>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    total: u64,
}

/// Tokens and identity from a successful login.
#[derive(Debug, Clone)]
pub struct LoginGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user: User,
}

/// Result of a refresh. `refresh_token` is set only when the backend rotates it.
#[derive(Debug, Clone)]
pub struct RefreshGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Raw history page, in server order.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub transactions: Vec<Transaction>,
    pub total: u64,
}

/// API client for the ledger backend.
/// Clone is cheap - the transport is shared behind an Arc.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    auth_url: String,
    api_base_url: String,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, auth_url: &str, api_base_url: &str) -> Self {
        Self {
            transport,
            auth_url: auth_url.trim_end_matches('/').to_string(),
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn auth_endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.auth_url, path)
    }

    fn api_endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base_url, path)
    }

    /// Pull the backend's message out of an error body, falling back to the raw text.
    fn backend_message(body: &str) -> String {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(ErrorBody { message: Some(m), .. }) | Ok(ErrorBody { error: Some(m), .. }) => m,
            _ => body.to_string(),
        }
    }

    /// Check if response is successful, returning an error with the backend's message if not.
    fn check_response(response: &ApiResponse) -> Result<()> {
        if response.is_success() {
            Ok(())
        } else {
            let message = Self::backend_message(&response.body);
            Err(NetworkError::from_status(response.status, &message).into())
        }
    }

    /// Decode an envelope and return its `data`.
    fn unwrap_envelope<T: DeserializeOwned>(response: &ApiResponse, what: &str) -> Result<T> {
        let envelope: Envelope<T> = serde_json::from_str(&response.body).map_err(|e| {
            NetworkError::MalformedResponse(format!("Failed to parse {} response: {}", what, e))
        })?;

        let success = envelope.success.unwrap_or(envelope.data.is_some());
        if !success {
            let message = envelope
                .message
                .or(envelope.error)
                .unwrap_or_else(|| format!("{} request was not successful", what));
            return Err(NetworkError::Rejected(message).into());
        }

        envelope.data.ok_or_else(|| {
            NetworkError::MalformedResponse(format!("{} response is missing data", what)).into()
        })
    }

    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        Ok(self.transport.execute(request).await?)
    }

    // ===== Authentication =====

    /// Exchange email/password for tokens. A 400/401 means bad credentials.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginGrant> {
        let url = self.auth_endpoint("login");
        let response = self
            .send(ApiRequest::post(url, json!({ "email": email, "password": password })))
            .await?;

        if matches!(response.status, 400 | 401) {
            let message = Self::backend_message(&response.body);
            return Err(AuthError::InvalidCredentials(message).into());
        }
        Self::check_response(&response)?;

        let data: LoginData = match Self::unwrap_envelope(&response, "login") {
            Ok(data) => data,
            Err(Error::Network(NetworkError::Rejected(message))) => {
                return Err(AuthError::InvalidCredentials(message).into());
            }
            Err(e) => return Err(e),
        };

        if !data.user.is_well_formed() {
            warn!("Login response carried an incomplete user record");
            return Err(NetworkError::MalformedResponse("login user record is incomplete".to_string()).into());
        }

        Ok(LoginGrant {
            access_token: data.tokens.access_token,
            refresh_token: data.tokens.refresh_token,
            user: data.user,
        })
    }

    /// Trade a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshGrant> {
        let url = self.auth_endpoint("refresh");
        let response = self
            .send(ApiRequest::post(url, json!({ "refresh_token": refresh_token })))
            .await?;
        Self::check_response(&response)?;

        let data: RefreshData = Self::unwrap_envelope(&response, "refresh")?;
        Ok(RefreshGrant {
            access_token: data.access_token,
            refresh_token: data.refresh_token,
        })
    }

    // ===== Ledger =====

    pub async fn balance(&self, token: &str) -> Result<i64> {
        let response = self
            .send(ApiRequest::get(self.api_endpoint("balance")).bearer(token))
            .await?;
        Self::check_response(&response)?;

        let data: BalanceData = Self::unwrap_envelope(&response, "balance")?;
        Ok(data.balance)
    }

    /// Returns the balance the backend reports after the spend, if it reports one.
    pub async fn spend(&self, token: &str, amount: i64, description: &str) -> Result<Option<i64>> {
        let body = json!({ "amount": amount, "description": description });
        let response = self
            .send(ApiRequest::post(self.api_endpoint("spend"), body).bearer(token))
            .await?;
        Self::check_response(&response)?;

        let data: MutationData = Self::unwrap_envelope(&response, "spend")?;
        debug!(amount = amount, reported = ?data.reported_balance(), "Spend accepted");
        Ok(data.reported_balance())
    }

    pub async fn add(
        &self,
        token: &str,
        amount: i64,
        kind: TransactionType,
        description: &str,
    ) -> Result<Option<i64>> {
        let body = json!({ "amount": amount, "type": kind.as_str(), "description": description });
        let response = self
            .send(ApiRequest::post(self.api_endpoint("add"), body).bearer(token))
            .await?;
        Self::check_response(&response)?;

        let data: MutationData = Self::unwrap_envelope(&response, "add")?;
        debug!(amount = amount, kind = %kind, reported = ?data.reported_balance(), "Add accepted");
        Ok(data.reported_balance())
    }

    pub async fn history(&self, token: &str, limit: u32, offset: u64) -> Result<HistoryPage> {
        let url = format!(
            "{}?limit={}&offset={}",
            self.api_endpoint("history"),
            limit,
            offset
        );
        let response = self.send(ApiRequest::get(url).bearer(token)).await?;
        Self::check_response(&response)?;

        let data: HistoryData = Self::unwrap_envelope(&response, "history")?;
        let total = data
            .pagination
            .map(|p| p.total)
            .unwrap_or(data.transactions.len() as u64);
        Ok(HistoryPage {
            transactions: data.transactions,
            total,
        })
    }
}
