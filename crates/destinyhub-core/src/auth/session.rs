//! Session state machine.
//!
//! `SessionManager` is the single owner of the process's OAuth session. It
//! persists credentials through a `CredentialStore`, talks to the identity
//! provider through a `TokenAuthority`, and runs interactive logins over a
//! `LoopbackListener`.
//!
//! State lives behind one async mutex. A refresh runs while that mutex is
//! held, so callers that arrive mid-refresh wait for it and reuse its result
//! instead of spending the refresh token a second time.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::Url;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use super::authority::TokenAuthority;
use super::credentials::{CredentialRecord, CredentialStore, StoreError};
use super::error::AuthError;
use super::listener::{ListenerError, LoopbackListener};
use crate::config::ClientConfig;

/// How long `login` waits for the browser redirect by default.
const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// Length of the anti-CSRF `state` parameter.
const STATE_LENGTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticated,
    Expired,
    Refreshing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Anonymous => "anonymous",
            SessionState::Authenticated => "authenticated",
            SessionState::Expired => "expired",
            SessionState::Refreshing => "refreshing",
        };
        f.write_str(label)
    }
}

/// Bearer token handed to API calls. Debug output never shows the value.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Startup check that a stored access token is still accepted.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn is_alive(&self, token: &AccessToken) -> bool;
}

struct SessionSlot {
    state: SessionState,
    record: Option<CredentialRecord>,
}

pub struct SessionManager {
    store: Arc<dyn CredentialStore>,
    authority: Arc<dyn TokenAuthority>,
    listener: LoopbackListener,
    auth_url: String,
    client_id: String,
    callback_timeout: Duration,
    slot: Mutex<SessionSlot>,
    login_gate: Mutex<()>,
    state_tx: watch::Sender<SessionState>,
}

impl SessionManager {
    /// Create a manager in the `Anonymous` state. Call `resume` to pick up
    /// stored credentials.
    pub fn new(
        config: &ClientConfig,
        store: Arc<dyn CredentialStore>,
        authority: Arc<dyn TokenAuthority>,
        listener: LoopbackListener,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Anonymous);
        Self {
            store,
            authority,
            listener,
            auth_url: config.auth_url.clone(),
            client_id: config.client_id.clone(),
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            slot: Mutex::new(SessionSlot {
                state: SessionState::Anonymous,
                record: None,
            }),
            login_gate: Mutex::new(()),
            state_tx,
        }
    }

    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Last published state. Does not wait for an in-flight refresh.
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions (e.g. to drive a status indicator).
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Bungie.net membership of the signed-in user, when known.
    pub async fn membership_id(&self) -> Option<String> {
        let slot = self.slot.lock().await;
        slot.record.as_ref().and_then(|r| r.membership_id.clone())
    }

    /// Initialize from the credential store.
    ///
    /// Stored credentials whose access token passes `probe` resume as
    /// `Authenticated`; otherwise they resume as `Expired` and the next
    /// `ensure_valid_token` refreshes. No stored record means `Anonymous`.
    pub async fn resume(&self, probe: &dyn LivenessProbe) -> Result<SessionState, AuthError> {
        let mut slot = self.slot.lock().await;

        let record = match self.store.load() {
            Ok(record) => record,
            Err(StoreError::Corrupt(e)) => {
                warn!(error = %e, "Discarding unreadable stored credentials");
                self.store.clear()?;
                None
            }
            Err(e) => return Err(e.into()),
        };

        let Some(record) = record.filter(|r| !r.refresh_token.is_empty()) else {
            debug!("No stored credentials");
            slot.record = None;
            self.transition(&mut slot, SessionState::Anonymous);
            return Ok(SessionState::Anonymous);
        };

        let token = AccessToken::new(record.access_token.as_str());
        let next = if probe.is_alive(&token).await {
            info!("Resumed stored session");
            SessionState::Authenticated
        } else {
            info!("Stored access token not accepted, will refresh on next use");
            SessionState::Expired
        };
        slot.record = Some(record);
        self.transition(&mut slot, next);
        Ok(next)
    }

    /// The one entry point for obtaining a bearer token.
    ///
    /// `Authenticated` returns the cached token without touching the network.
    /// `Expired` performs exactly one refresh. `Anonymous` fails with
    /// `RequiresLogin`; this never starts an interactive login.
    pub async fn ensure_valid_token(&self) -> Result<AccessToken, AuthError> {
        let mut slot = self.slot.lock().await;

        match slot.state {
            SessionState::Anonymous => return Err(AuthError::RequiresLogin),
            SessionState::Authenticated => {
                if let Some(record) = slot.record.as_ref().filter(|r| !r.is_expired()) {
                    return Ok(AccessToken::new(record.access_token.as_str()));
                }
                debug!("Cached access token is past its expiry");
            }
            // Refreshing here means a previous refresh was cancelled mid-flight.
            SessionState::Expired | SessionState::Refreshing => {}
        }

        self.refresh_locked(&mut slot).await
    }

    /// Report that `token` was refused by the API.
    ///
    /// Moves `Authenticated` to `Expired` only while `token` is still the
    /// current one, so late reports about an already-replaced token are
    /// ignored.
    pub async fn mark_unauthorized(&self, token: &AccessToken) {
        let mut slot = self.slot.lock().await;
        let is_current = slot
            .record
            .as_ref()
            .is_some_and(|r| r.access_token == token.as_str());

        if slot.state == SessionState::Authenticated && is_current {
            info!("Access token rejected by the API");
            self.transition(&mut slot, SessionState::Expired);
        } else {
            debug!(state = %slot.state, "Ignoring stale unauthorized report");
        }
    }

    /// Run the interactive authorization-code flow.
    ///
    /// `present` receives the authorization URL and is responsible for getting
    /// it in front of the user (open a browser, print it). Only valid from
    /// `Anonymous`.
    pub async fn login<F>(&self, present: F) -> Result<(), AuthError>
    where
        F: FnOnce(&str) + Send,
    {
        let _login = self
            .login_gate
            .try_lock()
            .map_err(|_| AuthError::LoginInProgress)?;

        if self.slot.lock().await.state != SessionState::Anonymous {
            return Err(AuthError::AlreadyAuthenticated);
        }

        let mut handle = self.listener.start().await.map_err(AuthError::Listener)?;
        let redirect_uri = handle.redirect_uri().to_string();
        let state = generate_state();
        let url = self.authorization_url(&redirect_uri, &state)?;

        info!(port = handle.port(), "Waiting for authorization redirect");
        present(url.as_str());

        let callback = handle
            .wait_for_code(self.callback_timeout)
            .await
            .map_err(|e| match e {
                ListenerError::Timeout => AuthError::Timeout,
                ListenerError::Denied(reason) => AuthError::Rejected(reason),
                ListenerError::Io(e) => AuthError::Listener(e),
            })?;

        if callback.state.as_deref() != Some(state.as_str()) {
            warn!("Authorization callback carried an unexpected state, discarding code");
            return Err(AuthError::StateMismatch);
        }

        let record = self
            .authority
            .exchange_code(&callback.code, &redirect_uri)
            .await?;

        let mut slot = self.slot.lock().await;
        if let Err(e) = self.store.save(&record) {
            error!(error = %e, "Failed to persist credentials; session lasts until exit");
        }
        slot.record = Some(record);
        self.transition(&mut slot, SessionState::Authenticated);
        info!("Login complete");
        Ok(())
    }

    /// Forget the session and its stored credentials.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let mut slot = self.slot.lock().await;
        slot.record = None;
        self.transition(&mut slot, SessionState::Anonymous);
        self.store.clear()?;
        info!("Logged out");
        Ok(())
    }

    fn authorization_url(&self, redirect_uri: &str, state: &str) -> Result<Url, AuthError> {
        Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", redirect_uri),
                ("state", state),
            ],
        )
        .map_err(|e| AuthError::InvalidConfig(format!("authorization URL: {}", e)))
    }

    async fn refresh_locked(&self, slot: &mut SessionSlot) -> Result<AccessToken, AuthError> {
        let Some(current) = slot.record.clone() else {
            self.transition(slot, SessionState::Anonymous);
            return Err(AuthError::RequiresLogin);
        };

        self.transition(slot, SessionState::Refreshing);
        match self.authority.refresh(&current.refresh_token).await {
            Ok(mut record) => {
                record.inherit(&current);
                if let Err(e) = self.store.save(&record) {
                    error!(error = %e, "Failed to persist refreshed credentials");
                }
                let token = AccessToken::new(record.access_token.as_str());
                slot.record = Some(record);
                self.transition(slot, SessionState::Authenticated);
                Ok(token)
            }
            Err(AuthError::Transport(detail)) => {
                warn!(error = %detail, "Token refresh failed in transit, keeping credentials");
                self.transition(slot, SessionState::Expired);
                Err(AuthError::Transport(detail))
            }
            Err(e) => {
                warn!(error = %e, "Refresh token no longer usable, signing out");
                slot.record = None;
                self.transition(slot, SessionState::Anonymous);
                if let Err(e) = self.store.clear() {
                    error!(error = %e, "Failed to clear stored credentials");
                }
                Err(AuthError::RequiresLogin)
            }
        }
    }

    fn transition(&self, slot: &mut SessionSlot, next: SessionState) {
        if slot.state != next {
            debug!(from = %slot.state, to = %next, "Session state change");
        }
        slot.state = next;
        self.state_tx.send_replace(next);
    }
}

fn generate_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_LENGTH)
        .map(char::from)
        .collect()
}
