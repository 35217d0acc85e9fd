//! Error taxonomy for session and ledger operations.
//!
//! Every failure is one of four families (auth, validation, ledger guard, network).
//! Validation and ledger-guard errors are produced locally without touching the network.
//! `Outcome` turns a `Result` into the `{success, data | error}` shape the host renders.

use serde::Serialize;
use thiserror::Error;

use crate::models::TransactionType;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("No credentials received from parent frame within {waited_ms}ms")]
    HandshakeTimeout { waited_ms: u64 },

    #[error("Parent frame refused to issue credentials: {0}")]
    HandshakeRejected(String),

    #[error("Message origin not allowed: {0}")]
    OriginRejected(String),

    #[error("Session expired - please sign in again")]
    SessionExpired,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Password login is not available in embedded mode")]
    PasswordLoginUnavailable,

    #[error("A login is already in progress")]
    LoginInProgress,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Amount must be a positive integer (got {0})")]
    InvalidAmount(i64),

    #[error("A description is required")]
    MissingDescription,

    #[error("Transaction type '{0}' cannot be used to add credits")]
    InvalidCreditType(TransactionType),

    #[error("Invalid page request: page {page}, page size {page_size}")]
    InvalidPage { page: u32, page_size: u32 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Insufficient balance: requested {requested}, available {current_balance}")]
    InsufficientBalance { current_balance: i64, requested: i64 },

    #[error("Credit limit exceeded: {current_balance} + {requested} is over the limit of {limit}")]
    CreditLimitExceeded {
        current_balance: i64,
        requested: i64,
        limit: i64,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl NetworkError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    /// Map a non-success status to an error. `message` is the backend's own
    /// message when one could be extracted, otherwise the raw body.
    pub fn from_status(status: u16, message: &str) -> Self {
        match status {
            401 => NetworkError::Unauthorized,
            429 => NetworkError::RateLimited,
            _ => NetworkError::Server {
                status,
                message: Self::truncate_body(message),
            },
        }
    }
}

impl Error {
    /// Stable machine-readable code for the host UI.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Auth(e) => match e {
                AuthError::InvalidCredentials(_) => "InvalidCredentials",
                AuthError::HandshakeTimeout { .. } => "HandshakeTimeout",
                AuthError::HandshakeRejected(_) => "HandshakeRejected",
                AuthError::OriginRejected(_) => "OriginRejected",
                AuthError::SessionExpired => "SessionExpired",
                AuthError::NotAuthenticated => "NotAuthenticated",
                AuthError::PasswordLoginUnavailable => "PasswordLoginUnavailable",
                AuthError::LoginInProgress => "LoginInProgress",
            },
            Error::Validation(e) => match e {
                ValidationError::InvalidAmount(_) => "InvalidAmount",
                ValidationError::MissingDescription => "MissingDescription",
                ValidationError::InvalidCreditType(_) => "InvalidCreditType",
                ValidationError::InvalidPage { .. } => "InvalidPage",
            },
            Error::Ledger(e) => match e {
                LedgerError::InsufficientBalance { .. } => "InsufficientBalance",
                LedgerError::CreditLimitExceeded { .. } => "CreditLimitExceeded",
            },
            Error::Network(e) => match e {
                NetworkError::Unreachable(_) => "Unreachable",
                NetworkError::MalformedResponse(_) => "MalformedResponse",
                NetworkError::Unauthorized => "Unauthorized",
                NetworkError::RateLimited => "RateLimited",
                NetworkError::Server { .. } => "ServerError",
                NetworkError::Rejected(_) => "Rejected",
            },
        }
    }

    /// True for the 401 that triggers a token refresh.
    pub(crate) fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Network(NetworkError::Unauthorized))
    }
}

/// Serializable description of a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_balance: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

impl From<&Error> for ErrorReport {
    fn from(err: &Error) -> Self {
        let (current_balance, requested, limit) = match err {
            Error::Ledger(LedgerError::InsufficientBalance {
                current_balance,
                requested,
            }) => (Some(*current_balance), Some(*requested), None),
            Error::Ledger(LedgerError::CreditLimitExceeded {
                current_balance,
                requested,
                limit,
            }) => (Some(*current_balance), Some(*requested), Some(*limit)),
            _ => (None, None, None),
        };
        Self {
            error: err.code(),
            message: err.to_string(),
            current_balance,
            requested,
            limit,
        }
    }
}

/// Discriminated result handed to the host: `{success: true, data}` or
/// `{success: false, error, message, ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outcome<T> {
    Success { success: bool, data: T },
    Failure {
        success: bool,
        #[serde(flatten)]
        report: ErrorReport,
    },
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Outcome::Success {
                success: true,
                data,
            },
            Err(err) => Outcome::Failure {
                success: false,
                report: ErrorReport::from(&err),
            },
        }
    }
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}
