//! Bearer credential management.
//!
//! A [`TokenProvider`] owns the session credential and knows how to renew it.
//! [`TokenManager`] wraps a provider and enforces the refresh discipline every
//! outbound request relies on:
//!
//! - at most one refresh is in flight; concurrent callers await the same
//!   shared outcome
//! - once a refresh has been triggered, no new one starts for the cooldown
//!   window; callers reuse the last known credential meanwhile
//! - a failed refresh invokes the auth-failure hook once, so the embedding
//!   application can send the user back through login

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Refresh when the credential expires within this window.
pub const DEFAULT_MIN_VALIDITY: Duration = Duration::from_secs(5);

/// Minimum spacing between two triggered refreshes.
pub const DEFAULT_REFRESH_COOLDOWN: Duration = Duration::from_secs(30);

// ============================================================================
// Credential
// ============================================================================

/// An opaque bearer token with an optional expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// A credential that never expires.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    /// A credential expiring `lifetime` from now.
    pub fn expiring_in(token: impl Into<String>, lifetime: Duration) -> Self {
        let expires_at = chrono::Duration::from_std(lifetime)
            .ok()
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime));
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Whether the credential expires within `window` (or already has).
    pub fn expires_within(&self, window: Duration) -> bool {
        match self.expires_at {
            None => false,
            Some(at) => match (at - Utc::now()).to_std() {
                Ok(left) => left <= window,
                Err(_) => true,
            },
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ============================================================================
// TokenProvider Trait
// ============================================================================

/// Source of the session credential.
#[async_trait]
pub trait TokenProvider: Send + Sync + fmt::Debug {
    /// The credential currently held, if any session exists.
    fn current_token(&self) -> Option<Credential>;

    /// Renew the credential so it stays valid for at least `min_validity`.
    ///
    /// Fails with [`Error::Auth`] when there is no session or the identity
    /// backend rejects the refresh.
    async fn refresh(&self, min_validity: Duration) -> Result<Credential>;

    /// Whether requests must carry a credential at all.
    ///
    /// Providers returning false run the client in single-user mode:
    /// requests go out without an `Authorization` header and change feeds
    /// skip the credential handshake.
    fn requires_session(&self) -> bool {
        true
    }
}

/// Shared provider handle.
pub type SharedTokenProvider = Arc<dyn TokenProvider>;

// ============================================================================
// StaticTokenProvider
// ============================================================================

/// Fixed token, e.g. a service-account token from the environment.
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    credential: Option<Credential>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            credential: Some(Credential::new(token)),
        }
    }

    /// A provider with no session; every refresh fails.
    pub fn anonymous() -> Self {
        Self { credential: None }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    fn current_token(&self) -> Option<Credential> {
        self.credential.clone()
    }

    async fn refresh(&self, _min_validity: Duration) -> Result<Credential> {
        self.credential
            .clone()
            .ok_or_else(|| Error::Auth("no authenticated session".to_string()))
    }
}

// ============================================================================
// NoAuthProvider
// ============================================================================

/// Backend without authentication (single-user deployments).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuthProvider;

#[async_trait]
impl TokenProvider for NoAuthProvider {
    fn current_token(&self) -> Option<Credential> {
        None
    }

    async fn refresh(&self, _min_validity: Duration) -> Result<Credential> {
        Err(Error::Auth("authentication is disabled".to_string()))
    }

    fn requires_session(&self) -> bool {
        false
    }
}

// ============================================================================
// OidcTokenProvider
// ============================================================================

/// Refresh-token grant against an OpenID Connect token endpoint.
#[derive(Debug)]
pub struct OidcTokenProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    refresh_token: RwLock<Option<String>>,
    credential: RwLock<Option<Credential>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl OidcTokenProvider {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            refresh_token: RwLock::new(Some(refresh_token.into())),
            credential: RwLock::new(None),
        }
    }

    /// Seed the provider with an access token obtained at login.
    pub fn with_access_token(self, credential: Credential) -> Self {
        *self.credential.write() = Some(credential);
        self
    }

    /// Drop the session; subsequent refreshes fail.
    pub fn logout(&self) {
        *self.refresh_token.write() = None;
        *self.credential.write() = None;
    }
}

#[async_trait]
impl TokenProvider for OidcTokenProvider {
    fn current_token(&self) -> Option<Credential> {
        self.credential.read().clone()
    }

    async fn refresh(&self, min_validity: Duration) -> Result<Credential> {
        if let Some(current) = self.current_token() {
            if !current.expires_within(min_validity) {
                return Ok(current);
            }
        }

        let refresh_token = self
            .refresh_token
            .read()
            .clone()
            .ok_or_else(|| Error::Auth("no refresh token; login required".to_string()))?;

        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token.as_str()),
        ];
        let response = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::Auth(format!("token refresh request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "token refresh rejected ({}): {}",
                status, body
            )));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Auth(format!("failed to parse refresh response: {}", e)))?;

        let credential = match tokens.expires_in {
            Some(secs) => Credential::expiring_in(tokens.access_token, Duration::from_secs(secs)),
            None => Credential::new(tokens.access_token),
        };
        if let Some(rotated) = tokens.refresh_token {
            *self.refresh_token.write() = Some(rotated);
        }
        *self.credential.write() = Some(credential.clone());

        tracing::info!(expires_at = ?credential.expires_at, "access token refreshed");
        Ok(credential)
    }
}

// ============================================================================
// TokenManager
// ============================================================================

type RefreshOutcome = std::result::Result<Credential, String>;
type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Callback invoked with the failure reason when a refresh is rejected.
pub type AuthFailureHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct RefreshState {
    pending: Option<PendingRefresh>,
    last_triggered: Option<Instant>,
}

/// Coalescing, rate-limited front for a [`TokenProvider`].
pub struct TokenManager {
    provider: SharedTokenProvider,
    min_validity: Duration,
    cooldown: Duration,
    state: Mutex<RefreshState>,
    refresh_count: AtomicU32,
    on_auth_failure: Option<AuthFailureHook>,
}

impl TokenManager {
    pub fn new(provider: SharedTokenProvider) -> Self {
        Self {
            provider,
            min_validity: DEFAULT_MIN_VALIDITY,
            cooldown: DEFAULT_REFRESH_COOLDOWN,
            state: Mutex::new(RefreshState::default()),
            refresh_count: AtomicU32::new(0),
            on_auth_failure: None,
        }
    }

    pub fn with_min_validity(mut self, min_validity: Duration) -> Self {
        self.min_validity = min_validity;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Install the escalation callback for rejected refreshes.
    pub fn on_auth_failure(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_auth_failure = Some(Arc::new(hook));
        self
    }

    /// Number of refreshes triggered so far.
    pub fn refresh_count(&self) -> u32 {
        self.refresh_count.load(Ordering::SeqCst)
    }

    /// Current credential without triggering a refresh.
    pub fn current_token(&self) -> Option<Credential> {
        self.provider.current_token()
    }

    /// Token to attach to the next request, or `None` when the provider
    /// does not use sessions.
    pub async fn authorization(&self) -> Result<Option<String>> {
        if !self.provider.requires_session() {
            return Ok(None);
        }
        self.bearer().await.map(Some)
    }

    /// Get a bearer token suitable for the next request.
    ///
    /// Refreshes at most once across all concurrent callers. Inside the
    /// cooldown window a stale credential is returned as-is.
    pub async fn bearer(&self) -> Result<String> {
        let current = self.provider.current_token();
        if let Some(credential) = &current {
            if !credential.expires_within(self.min_validity) {
                return Ok(credential.token.clone());
            }
        }

        let pending = {
            let mut state = self.state.lock();
            match state.pending.clone() {
                Some(pending) => pending,
                None => {
                    let now = Instant::now();
                    let cooling = state
                        .last_triggered
                        .is_some_and(|at| now.duration_since(at) < self.cooldown);
                    if cooling {
                        tracing::debug!("token refresh suppressed during cooldown");
                        return current.map(|c| c.token).ok_or_else(|| {
                            Error::Auth("no authenticated session".to_string())
                        });
                    }
                    state.last_triggered = Some(now);
                    let pending = self.start_refresh();
                    state.pending = Some(pending.clone());
                    pending
                }
            }
        };

        let outcome = pending.await;

        {
            let mut state = self.state.lock();
            if state.pending.as_ref().is_some_and(|p| p.peek().is_some()) {
                state.pending = None;
            }
        }

        outcome.map(|c| c.token).map_err(Error::Auth)
    }

    fn start_refresh(&self) -> PendingRefresh {
        self.refresh_count.fetch_add(1, Ordering::SeqCst);
        let provider = Arc::clone(&self.provider);
        let min_validity = self.min_validity;
        let hook = self.on_auth_failure.clone();

        async move {
            tracing::debug!("refreshing bearer token");
            match provider.refresh(min_validity).await {
                Ok(credential) => Ok(credential),
                Err(e) => {
                    let reason = match e {
                        Error::Auth(message) => message,
                        other => other.to_string(),
                    };
                    tracing::error!(error = %reason, "token refresh failed");
                    if let Some(hook) = hook {
                        hook(&reason);
                    }
                    Err(reason)
                }
            }
        }
        .boxed()
        .shared()
    }
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("provider", &self.provider)
            .field("min_validity", &self.min_validity)
            .field("cooldown", &self.cooldown)
            .field("refresh_count", &self.refresh_count())
            .finish()
    }
}

/// Shared token manager for use across async contexts.
pub type SharedTokenManager = Arc<TokenManager>;
