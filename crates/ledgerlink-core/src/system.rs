//! `CreditSystem`: one handle that owns the mode, session, and ledger.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::api::{ApiClient, Transport};
use crate::auth::{SessionManager, SessionState, SessionStore};
use crate::config::Config;
use crate::embed::{FrameBridge, FrameEvent, ParentPort};
use crate::error::Result;
use crate::ledger::{BalanceReport, LedgerClient, MutationReceipt};
use crate::mode::{BrowsingContext, Mode, ModeDetector};
use crate::models::{PaginatedHistory, TransactionType, User};

/// Read-only view for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub is_authenticated: bool,
    pub user: Option<User>,
    pub balance: Option<i64>,
    pub loading: bool,
    pub error: Option<String>,
}

pub struct CreditSystem {
    config: Config,
    mode: Mode,
    session: Arc<SessionManager>,
    ledger: LedgerClient,
}

impl CreditSystem {
    pub fn new(
        config: Config,
        ctx: &dyn BrowsingContext,
        transport: Arc<dyn Transport>,
        store: Arc<dyn SessionStore>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let mode = ModeDetector::new().resolve(config.mode, ctx);
        let api = ApiClient::new(transport, &config.auth_url, &config.api_base_url);
        let session = Arc::new(SessionManager::new(mode, api.clone(), store));
        let ledger = LedgerClient::new(session.clone(), api, &config);
        Ok(Self {
            config,
            mode,
            session,
            ledger,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn ledger(&self) -> &LedgerClient {
        &self.ledger
    }

    /// Restore (standalone) or start waiting for the parent (embedded).
    pub async fn start(&self) -> SessionState {
        let state = self.session.initialize().await;
        info!(mode = %self.mode, state = %state, "Credit system started");
        state
    }

    /// Frame bridge for an embedded instance. `None` in standalone mode.
    pub fn bridge(
        &self,
        port: Arc<dyn ParentPort>,
        inbound: mpsc::Receiver<FrameEvent>,
    ) -> Option<FrameBridge> {
        if self.mode != Mode::Embedded {
            debug!("No frame bridge in standalone mode");
            return None;
        }
        Some(FrameBridge::new(
            self.session.clone(),
            self.ledger.clone(),
            port,
            inbound,
            &self.config,
        ))
    }

    pub async fn snapshot(&self) -> Snapshot {
        let ledger = self.ledger.state().await;
        let balance = ledger.display_balance();
        let error = match ledger.last_error {
            Some(e) => Some(e),
            None => self.session.last_error().await,
        };
        Snapshot {
            is_authenticated: self.session.is_authenticated().await,
            user: self.session.user().await,
            balance,
            loading: self.ledger.is_loading(),
            error,
        }
    }

    // ===== Delegated operations =====

    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let user = self.session.login(email, password).await?;
        self.ledger.reset().await;
        Ok(user)
    }

    pub async fn logout(&self) {
        self.session.logout().await;
        self.ledger.reset().await;
    }

    pub async fn check_balance(&self) -> Result<BalanceReport> {
        self.ledger.check_balance().await
    }

    pub async fn spend(&self, amount: i64, description: &str) -> Result<MutationReceipt> {
        self.ledger.spend(amount, description).await
    }

    pub async fn add(
        &self,
        amount: i64,
        kind: TransactionType,
        description: &str,
    ) -> Result<MutationReceipt> {
        self.ledger.add(amount, kind, description).await
    }

    pub async fn get_history(&self, page: u32, page_size: u32) -> Result<PaginatedHistory> {
        self.ledger.get_history(page, page_size).await
    }
}
