//! Embedded-mode bridge to the parent frame.
//!
//! The bridge owns the inbound message stream. Every event is origin-checked
//! before its payload is looked at. Events from origins outside the allow-list
//! are dropped without parsing.
//!
//! Handshake policy: one overall deadline of `handshakeTimeoutMs`. Within it,
//! `REQUEST_JWT_TOKEN` is sent up to `handshakeAttempts` times at even
//! intervals. If no valid answer has arrived by the deadline, the bridge asks
//! the parent to reload the frame (`REQUEST_IFRAME_RELOAD`) and the session
//! moves to `HandshakeFailed`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::protocol::{now_millis, FrameEvent, InboundMessage, OriginAllowList, OutboundMessage, ParentPort};
use crate::auth::{SessionManager, SessionState};
use crate::config::Config;
use crate::error::{AuthError, Result};
use crate::ledger::LedgerClient;
use crate::models::User;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    OriginRejected(String),
    Malformed(String),
    /// A token response with neither usable credentials nor an error.
    Incomplete,
    NotAuthenticated,
    /// Credentials arrived after the handshake failed or the session was cleared.
    HandshakeClosed,
    UnknownType,
}

/// What handling one inbound event did.
#[derive(Debug)]
pub enum Dispatch {
    Ignored(IgnoreReason),
    Authenticated(User),
    HandshakeRejected(String),
    StatusSent,
    SessionCleared,
    BalanceRefresh(JoinHandle<()>),
}

pub struct FrameBridge {
    session: Arc<SessionManager>,
    ledger: LedgerClient,
    port: Arc<dyn ParentPort>,
    inbound: mpsc::Receiver<FrameEvent>,
    allow: OriginAllowList,
    timeout: Duration,
    attempts: u32,
}

impl FrameBridge {
    pub fn new(
        session: Arc<SessionManager>,
        ledger: LedgerClient,
        port: Arc<dyn ParentPort>,
        inbound: mpsc::Receiver<FrameEvent>,
        config: &Config,
    ) -> Self {
        let allow = OriginAllowList::new(&config.allowed_origins);
        if allow.is_empty() {
            warn!("No allowed origins configured; every parent message will be discarded");
        }
        Self {
            session,
            ledger,
            port,
            inbound,
            allow,
            timeout: config.handshake_timeout(),
            attempts: config.handshake_attempts.max(1),
        }
    }

    fn post(&self, message: OutboundMessage) {
        if let Err(e) = self.port.post_message(&message) {
            warn!(error = %e, "Failed to post message to parent frame");
        }
    }

    /// Obtain credentials from the parent frame.
    pub async fn handshake(&mut self) -> Result<User> {
        if self.session.state().await != SessionState::AwaitingHandshake {
            self.session.begin_handshake().await;
        }

        let started = Instant::now();
        let deadline = started + self.timeout;
        let interval = self.timeout / self.attempts;
        let mut next_request = started;
        let mut sent = 0u32;

        loop {
            if sent < self.attempts && Instant::now() >= next_request {
                sent += 1;
                info!(attempt = sent, of = self.attempts, "Requesting credentials from parent frame");
                self.post(OutboundMessage::RequestJwtToken {
                    timestamp: now_millis(),
                });
                next_request += interval;
            }

            let wake = if sent < self.attempts {
                next_request.min(deadline)
            } else {
                deadline
            };

            let event = tokio::select! {
                event = self.inbound.recv() => event,
                _ = sleep_until(wake) => {
                    if wake >= deadline {
                        break;
                    }
                    continue;
                }
            };

            let Some(event) = event else {
                warn!("Parent message channel closed during handshake");
                sleep_until(deadline).await;
                break;
            };

            match self.handle_event(event).await {
                Dispatch::Authenticated(user) => {
                    info!(user_id = %user.id, attempts = sent, "Handshake complete");
                    return Ok(user);
                }
                Dispatch::HandshakeRejected(message) => {
                    let reason = AuthError::HandshakeRejected(message);
                    self.session.fail_handshake(&reason).await;
                    return Err(reason.into());
                }
                other => debug!(dispatch = ?other, "Message handled while awaiting handshake"),
            }
        }

        let reason = AuthError::HandshakeTimeout {
            waited_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        };
        warn!(attempts = sent, "No credentials from parent frame, requesting reload");
        self.post(OutboundMessage::RequestIframeReload {
            attempts: sent,
            timestamp: now_millis(),
        });
        self.session.fail_handshake(&reason).await;
        Err(reason.into())
    }

    /// Serve parent messages until the channel closes.
    pub async fn run(&mut self) {
        while let Some(event) = self.inbound.recv().await {
            match self.handle_event(event).await {
                Dispatch::HandshakeRejected(message) => {
                    warn!(error = %message, "Parent reported a credential error after handshake");
                }
                other => debug!(dispatch = ?other, "Parent message handled"),
            }
        }
        debug!("Parent message channel closed");
    }

    async fn accept_credentials(&self, token: String, refresh_token: Option<String>, user: User) -> Dispatch {
        match self.session.complete_handshake(token, refresh_token, user).await {
            Ok(user) => {
                self.ledger.reset().await;
                self.post(OutboundMessage::CreditSystemReady {
                    user: user.clone(),
                    timestamp: now_millis(),
                });
                Dispatch::Authenticated(user)
            }
            Err(e) => Dispatch::Ignored(IgnoreReason::Malformed(e.to_string())),
        }
    }

    /// Handle one inbound event. The origin check comes first, before the
    /// payload is touched.
    pub async fn handle_event(&self, event: FrameEvent) -> Dispatch {
        if self.allow.check(&event.origin).is_err() {
            warn!(origin = %event.origin, "Discarding message from non-allow-listed origin");
            return Dispatch::Ignored(IgnoreReason::OriginRejected(event.origin));
        }

        let message: InboundMessage = match serde_json::from_value(event.data) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "Discarding malformed parent message");
                return Dispatch::Ignored(IgnoreReason::Malformed(e.to_string()));
            }
        };

        match message {
            InboundMessage::JwtTokenResponse {
                token: Some(token),
                refresh_token,
                user: Some(user),
                ..
            } => {
                let state = self.session.state().await;
                if state != SessionState::AwaitingHandshake && !state.is_authenticated() {
                    debug!(state = %state, "Discarding token response outside a pending handshake");
                    return Dispatch::Ignored(IgnoreReason::HandshakeClosed);
                }
                self.accept_credentials(token, refresh_token, user).await
            }
            InboundMessage::JwtTokenResponse {
                token: None,
                error: Some(error),
                ..
            } => Dispatch::HandshakeRejected(error),
            InboundMessage::JwtTokenResponse { .. } => {
                debug!("Token response carried neither credentials nor an error");
                Dispatch::Ignored(IgnoreReason::Incomplete)
            }
            InboundMessage::RefreshBalance => {
                if !self.session.is_authenticated().await {
                    return Dispatch::Ignored(IgnoreReason::NotAuthenticated);
                }
                let ledger = self.ledger.clone();
                let handle = tokio::spawn(async move {
                    if let Err(e) = ledger.check_balance().await {
                        warn!(error = %e, "Parent-requested balance refresh failed");
                    }
                });
                Dispatch::BalanceRefresh(handle)
            }
            InboundMessage::ClearStorage | InboundMessage::ClearSession => {
                if self.session.is_authenticated().await {
                    self.session.logout().await;
                } else {
                    self.session.purge_persisted();
                }
                self.ledger.reset().await;
                info!("Session cleared at parent's request");
                Dispatch::SessionCleared
            }
            InboundMessage::GetStatus => {
                self.post(OutboundMessage::StatusResponse {
                    is_authenticated: self.session.is_authenticated().await,
                    user: self.session.user().await,
                    balance: self.ledger.cached_balance().await,
                    timestamp: now_millis(),
                });
                Dispatch::StatusSent
            }
            InboundMessage::Unknown => Dispatch::Ignored(IgnoreReason::UnknownType),
        }
    }
}
