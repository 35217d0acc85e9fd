//! Ledger operations: balance, spend, add, history.
//!
//! Every call goes through `SessionManager::authorized`, so a 401 gets one
//! refresh-and-retry. The client-side guards (positive amount, enough balance,
//! credit ceiling) run before any network call, but they are only UX checks:
//! whatever the backend answers is final.
//!
//! Calls are not queued. If a spend and a balance refresh overlap, whichever
//! response lands last sets the cached balance.
//!
//! The cache is tagged with the session epoch it was filled under. A response
//! that arrives after the session was cleared or replaced is returned to its
//! caller but never cached, and a cache from an earlier epoch reads as empty.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

use super::state::{BalanceReport, LedgerState, MutationReceipt};
use crate::api::ApiClient;
use crate::auth::SessionManager;
use crate::config::Config;
use crate::error::{AuthError, Error, LedgerError, Result, ValidationError};
use crate::models::{PaginatedHistory, TransactionType};

/// Decrements the in-flight counter when a call finishes.
struct Busy(Arc<AtomicUsize>);

impl Busy {
    fn start(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Busy(Arc::clone(counter))
    }
}

impl Drop for Busy {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct Cached {
    epoch: u64,
    state: LedgerState,
}

/// Clone is cheap - all shared state is behind Arcs.
#[derive(Clone)]
pub struct LedgerClient {
    session: Arc<SessionManager>,
    api: ApiClient,
    cache: Arc<RwLock<Cached>>,
    in_flight: Arc<AtomicUsize>,
    max_credit_limit: i64,
    require_description: bool,
    history_page_size: u32,
}

impl LedgerClient {
    pub fn new(session: Arc<SessionManager>, api: ApiClient, config: &Config) -> Self {
        Self {
            session,
            api,
            cache: Arc::new(RwLock::new(Cached::default())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_credit_limit: config.max_credit_limit,
            require_description: config.require_description,
            history_page_size: config.history_page_size,
        }
    }

    // ===== Cached state =====

    /// Cached state for the current session; empty if it belongs to an older one.
    pub async fn state(&self) -> LedgerState {
        let epoch = self.session.epoch().await;
        let cached = self.cache.read().await;
        if cached.epoch == epoch {
            cached.state.clone()
        } else {
            LedgerState::default()
        }
    }

    pub async fn cached_balance(&self) -> Option<i64> {
        self.state().await.balance
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Forget everything cached.
    pub async fn reset(&self) {
        self.cache.write().await.state = LedgerState::default();
    }

    /// Write access to the cache for a call started under `epoch`. `None` if
    /// the session has moved on since.
    async fn cache_for(&self, epoch: u64) -> Option<RwLockWriteGuard<'_, Cached>> {
        if self.session.epoch().await != epoch {
            debug!(epoch = epoch, "Session changed while request was in flight; not caching response");
            return None;
        }
        let mut cached = self.cache.write().await;
        if cached.epoch > epoch {
            return None;
        }
        if cached.epoch < epoch {
            *cached = Cached {
                epoch,
                state: LedgerState::default(),
            };
        }
        Some(cached)
    }

    async fn record_error(&self, epoch: u64, err: &Error) {
        if let Some(mut cached) = self.cache_for(epoch).await {
            cached.state.last_error = Some(err.to_string());
        }
    }

    // ===== Guards =====

    /// Epoch of the current session, or `NotAuthenticated`.
    async fn ensure_authenticated(&self) -> Result<u64> {
        let epoch = self.session.epoch().await;
        if self.session.is_authenticated().await {
            Ok(epoch)
        } else {
            Err(AuthError::NotAuthenticated.into())
        }
    }

    fn validate_amount(amount: i64) -> Result<()> {
        if amount <= 0 {
            return Err(ValidationError::InvalidAmount(amount).into());
        }
        Ok(())
    }

    fn validate_description<'a>(&self, description: &'a str) -> Result<&'a str> {
        let trimmed = description.trim();
        if self.require_description && trimmed.is_empty() {
            return Err(ValidationError::MissingDescription.into());
        }
        Ok(trimmed)
    }

    // ===== Operations =====

    /// Authoritative balance fetch. Always overwrites the cached balance.
    pub async fn check_balance(&self) -> Result<BalanceReport> {
        let epoch = self.ensure_authenticated().await?;
        let _busy = Busy::start(&self.in_flight);

        let api = &self.api;
        let result = self
            .session
            .authorized(|token| async move { api.balance(&token).await })
            .await;

        match result {
            Ok(balance) => {
                debug!(balance = balance, "Balance fetched");
                if let Some(mut cached) = self.cache_for(epoch).await {
                    cached.state.record_balance(balance);
                }
                Ok(BalanceReport { balance })
            }
            Err(e) => {
                self.record_error(epoch, &e).await;
                Err(e)
            }
        }
    }

    pub async fn spend(&self, amount: i64, description: &str) -> Result<MutationReceipt> {
        let epoch = self.ensure_authenticated().await?;
        Self::validate_amount(amount)?;
        let description = self.validate_description(description)?;

        let known = self.state().await.balance;
        if let Some(current_balance) = known {
            if amount > current_balance {
                return Err(LedgerError::InsufficientBalance {
                    current_balance,
                    requested: amount,
                }
                .into());
            }
        }

        let reported = {
            let _busy = Busy::start(&self.in_flight);
            let api = &self.api;
            self.session
                .authorized(|token| async move { api.spend(&token, amount, description).await })
                .await
        };
        let reported = match reported {
            Ok(reported) => reported,
            Err(e) => {
                warn!(amount = amount, error = %e, "Spend failed");
                self.record_error(epoch, &e).await;
                return Err(e);
            }
        };

        let receipt = self.apply_mutation(epoch, reported, known.map(|b| b - amount)).await;
        info!(amount = amount, new_balance = ?receipt.new_balance, provisional = receipt.provisional, "Spend completed");
        self.refresh_after_mutation().await;
        Ok(receipt)
    }

    pub async fn add(
        &self,
        amount: i64,
        kind: TransactionType,
        description: &str,
    ) -> Result<MutationReceipt> {
        let epoch = self.ensure_authenticated().await?;
        Self::validate_amount(amount)?;
        if !kind.is_credit() {
            return Err(ValidationError::InvalidCreditType(kind).into());
        }
        let description = self.validate_description(description)?;

        let known = self.state().await.balance;
        let current_balance = known.unwrap_or(0);
        let over_limit = current_balance
            .checked_add(amount)
            .map_or(true, |total| total > self.max_credit_limit);
        if over_limit {
            return Err(LedgerError::CreditLimitExceeded {
                current_balance,
                requested: amount,
                limit: self.max_credit_limit,
            }
            .into());
        }

        let reported = {
            let _busy = Busy::start(&self.in_flight);
            let api = &self.api;
            self.session
                .authorized(|token| async move { api.add(&token, amount, kind, description).await })
                .await
        };
        let reported = match reported {
            Ok(reported) => reported,
            Err(e) => {
                warn!(amount = amount, kind = %kind, error = %e, "Add failed");
                self.record_error(epoch, &e).await;
                return Err(e);
            }
        };

        let receipt = self.apply_mutation(epoch, reported, known.map(|b| b + amount)).await;
        info!(amount = amount, kind = %kind, new_balance = ?receipt.new_balance, provisional = receipt.provisional, "Add completed");
        self.refresh_after_mutation().await;
        Ok(receipt)
    }

    /// Fetch one page. Results are ordered newest first no matter how the
    /// backend ordered them, and replace any previously fetched page.
    pub async fn get_history(&self, page: u32, page_size: u32) -> Result<PaginatedHistory> {
        let epoch = self.ensure_authenticated().await?;
        if page == 0 || page_size == 0 {
            return Err(ValidationError::InvalidPage { page, page_size }.into());
        }
        let _busy = Busy::start(&self.in_flight);

        let offset = u64::from(page - 1) * u64::from(page_size);
        let api = &self.api;
        let result = self
            .session
            .authorized(|token| async move { api.history(&token, page_size, offset).await })
            .await;

        match result {
            Ok(raw) => {
                let history = PaginatedHistory::new(raw.transactions, page, page_size, raw.total);
                debug!(page = page, count = history.transactions.len(), total = history.total_count, "History fetched");
                if let Some(mut cached) = self.cache_for(epoch).await {
                    cached.state.history = Some(history.clone());
                }
                Ok(history)
            }
            Err(e) => {
                self.record_error(epoch, &e).await;
                Err(e)
            }
        }
    }

    /// A backend-reported balance is authoritative and cached. Otherwise the
    /// local computation is kept aside as provisional.
    async fn apply_mutation(
        &self,
        epoch: u64,
        reported: Option<i64>,
        fallback: Option<i64>,
    ) -> MutationReceipt {
        let receipt = match reported {
            Some(balance) => MutationReceipt {
                new_balance: Some(balance),
                provisional: false,
            },
            None => {
                debug!(fallback = ?fallback, "Backend omitted the new balance, using provisional value");
                MutationReceipt {
                    new_balance: fallback,
                    provisional: true,
                }
            }
        };

        if let Some(mut cached) = self.cache_for(epoch).await {
            let state = &mut cached.state;
            match reported {
                Some(balance) => state.record_balance(balance),
                None => {
                    state.provisional_balance = fallback;
                    state.last_error = None;
                }
            }
        }
        receipt
    }

    /// Re-read balance and the first history page after a mutation.
    async fn refresh_after_mutation(&self) {
        let (balance, history) = futures::future::join(
            self.check_balance(),
            self.get_history(1, self.history_page_size),
        )
        .await;
        if let Err(e) = balance {
            warn!(error = %e, "Balance refresh after mutation failed");
        }
        if let Err(e) = history {
            warn!(error = %e, "History refresh after mutation failed");
        }
    }
}
