//! Access token lifecycle: load, cache, proactive refresh and persistence.
//!
//! When many tasks notice at the same moment that the token is about to
//! expire, exactly one of them performs the refresh:
//!
//! 1. The first caller installs an in-flight marker (a `watch` receiver whose
//!    sender it keeps) and becomes the refresher.
//! 2. Later callers clone the receiver, release the lock and wait for the
//!    sender to be dropped.
//! 3. The refresher calls the [`TokenRefresher`] without holding the lock,
//!    commits the new token under the lock, clears the marker and drops the
//!    sender, which wakes every waiter exactly once.
//! 4. Waiters re-check the cached token; if the refresh failed, one of them
//!    becomes the next refresher.
//!
//! The marker is cleared by a drop guard, so a refresher whose future is
//! cancelled or panics still releases the waiters.

use crate::error::{BoxError, Error, Result, Suspension};
use crate::token::{ManagedToken, TokenStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// How long before expiry a token is proactively refreshed.
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(5 * 60);

/// Lifetime assumed when the platform's expiry time cannot be parsed.
pub const FALLBACK_TOKEN_LIFETIME: Duration = Duration::from_secs(10 * 60 * 60);

/// A freshly issued token as reported by the platform.
#[derive(Clone)]
pub struct TokenGrant {
    /// The new bearer token.
    pub access_token: String,
    /// Expiry in the platform's representation (RFC 3339).
    pub expire_time: String,
    /// Granted scopes.
    pub scope: Option<String>,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("expire_time", &self.expire_time)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Obtains a new access token for a store handle.
///
/// [`TokenEndpoint`](crate::auth::TokenEndpoint) implements this against the
/// Shopline OAuth API; tests and custom deployments can supply their own.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Issues a new token for `handle`.
    async fn refresh(&self, handle: &str) -> std::result::Result<TokenGrant, BoxError>;
}

#[derive(Default)]
struct TokenState {
    token: Option<ManagedToken>,
    refreshing: Option<watch::Receiver<()>>,
    initialized: bool,
}

enum Next {
    Wait(watch::Receiver<()>),
    Refresh(watch::Sender<()>),
}

/// Keeps one access token valid for a `(handle, app key)` pair.
///
/// Share it behind an [`Arc`]; every method takes `&self`.
pub struct TokenManager {
    handle: String,
    store_key: String,
    store: Option<Arc<dyn TokenStore>>,
    refresher: Arc<dyn TokenRefresher>,
    refresh_buffer: Duration,
    state: Mutex<TokenState>,
}

impl TokenManager {
    /// Starts building a manager for `handle`, refreshing through `refresher`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use slshop::auth::{App, TokenEndpoint};
    /// use slshop::{FileTokenStore, TokenManager};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// # fn example() -> Result<(), slshop::Error> {
    /// let app = App::new("app-key", "app-secret");
    /// let manager = TokenManager::builder("open001", &app.app_key, Arc::new(TokenEndpoint::new(app.clone())?))
    ///     .store(Arc::new(FileTokenStore::new("./tokens")))
    ///     .refresh_buffer(Duration::from_secs(10 * 60))
    ///     .build();
    /// # Ok(())
    /// # }
    /// ```
    pub fn builder(
        handle: impl Into<String>,
        app_key: impl AsRef<str>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> TokenManagerBuilder {
        let handle = handle.into();
        let store_key = format!("{}:{}", handle, app_key.as_ref());
        TokenManagerBuilder {
            handle,
            store_key,
            store: None,
            refresher,
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
        }
    }

    /// The store handle this manager serves.
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// The key used for the token store.
    pub fn store_key(&self) -> &str {
        &self.store_key
    }

    /// Returns a snapshot of the cached token, if any.
    pub fn current_token(&self) -> Option<ManagedToken> {
        self.lock_state().token.clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a valid access token, refreshing it first if it is missing or
    /// expires within the refresh buffer.
    ///
    /// Safe to call from many tasks at once: only one refresh runs at a time
    /// and the others wait for it. Cancelling `cancel` while waiting (or while
    /// refreshing) returns [`Error::Cancelled`] immediately.
    pub async fn get_token(&self, cancel: &CancellationToken) -> Result<String> {
        let load_from_store = {
            let mut state = self.lock_state();
            let first_call = !state.initialized;
            state.initialized = true;
            first_call && self.store.is_some()
        };
        if load_from_store {
            if let Err(e) = self.load_from_store().await {
                tracing::debug!(handle = %self.handle, error = %e, "Failed to load token from store");
            }
        }

        loop {
            let next = {
                let mut state = self.lock_state();
                if let Some(token) = state
                    .token
                    .as_ref()
                    .filter(|t| !t.is_expiring(self.refresh_buffer))
                {
                    return Ok(token.access_token.clone());
                }

                match state.refreshing.clone() {
                    Some(in_flight) => Next::Wait(in_flight),
                    None => {
                        let (done, in_flight) = watch::channel(());
                        state.refreshing = Some(in_flight);
                        Next::Refresh(done)
                    }
                }
            };

            match next {
                Next::Refresh(done) => return self.refresh_as_leader(cancel, done).await,
                Next::Wait(mut in_flight) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Err(Error::Cancelled(Suspension::TokenRefresh));
                        }
                        // Resolves with an error once the sender is dropped.
                        _ = in_flight.changed() => {}
                    }
                }
            }
        }
    }

    async fn refresh_as_leader(
        &self,
        cancel: &CancellationToken,
        done: watch::Sender<()>,
    ) -> Result<String> {
        let guard = RefreshGuard {
            manager: self,
            _done: done,
        };

        tracing::debug!(handle = %self.handle, "Refreshing access token");
        let token = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled(Suspension::TokenRefresh)),
            refreshed = self.fetch_token() => refreshed,
        }?;

        self.lock_state().token = Some(token.clone());
        drop(guard);

        Ok(token.access_token)
    }

    async fn fetch_token(&self) -> Result<ManagedToken> {
        let grant = self
            .refresher
            .refresh(&self.handle)
            .await
            .map_err(|source| Error::TokenRefresh {
                handle: self.handle.clone(),
                source,
            })?;

        let expire_at = match DateTime::parse_from_rfc3339(&grant.expire_time) {
            Ok(at) => at.with_timezone(&Utc),
            Err(e) => {
                tracing::debug!(
                    handle = %self.handle,
                    expire_time = %grant.expire_time,
                    error = %e,
                    "Unparsable token expiry, assuming default lifetime"
                );
                fallback_expiry()
            }
        };

        let token = ManagedToken::new(grant.access_token, expire_at, grant.scope);

        if let Some(store) = &self.store {
            if let Err(e) = store.set(&self.store_key, &token).await {
                tracing::warn!(handle = %self.handle, error = %e, "Failed to persist refreshed token");
            }
        }

        tracing::debug!(handle = %self.handle, expire_at = %token.expire_at.to_rfc3339(), "Token refreshed");
        Ok(token)
    }

    async fn load_from_store(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let Some(token) = store.get(&self.store_key).await? else {
            return Ok(());
        };
        if token.is_expired() {
            tracing::debug!(handle = %self.handle, "Persisted token is expired, a refresh will follow");
            return Ok(());
        }

        tracing::debug!(handle = %self.handle, expire_at = %token.expire_at.to_rfc3339(), "Loaded token from store");
        let mut state = self.lock_state();
        // A token seeded while the store was being read wins.
        if state.token.is_none() {
            state.token = Some(token);
        }
        Ok(())
    }

    /// Seeds the manager with a token obtained out of band (for example right
    /// after the OAuth code exchange) and persists it.
    ///
    /// Unlike refreshes, a failure to persist is returned to the caller; the
    /// in-memory token is installed either way.
    pub async fn set_initial_token(
        &self,
        access_token: impl Into<String>,
        expire_at: DateTime<Utc>,
        scope: Option<String>,
    ) -> Result<()> {
        let token = ManagedToken::new(access_token, expire_at, scope);
        {
            let mut state = self.lock_state();
            state.token = Some(token.clone());
            state.initialized = true;
        }

        if let Some(store) = &self.store {
            store.set(&self.store_key, &token).await?;
        }
        Ok(())
    }

    /// Forgets the cached token and removes it from the store; the next
    /// [`get_token`](Self::get_token) call refreshes.
    pub async fn invalidate_token(&self) -> Result<()> {
        self.lock_state().token = None;

        if let Some(store) = &self.store {
            store.delete(&self.store_key).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("handle", &self.handle)
            .field("store_key", &self.store_key)
            .field("refresh_buffer", &self.refresh_buffer)
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

fn fallback_expiry() -> DateTime<Utc> {
    let lifetime = chrono::Duration::from_std(FALLBACK_TOKEN_LIFETIME)
        .unwrap_or_else(|_| chrono::Duration::hours(10));
    Utc::now() + lifetime
}

/// Clears the in-flight marker and then drops the sender, waking all waiters.
struct RefreshGuard<'a> {
    manager: &'a TokenManager,
    _done: watch::Sender<()>,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.manager.lock_state().refreshing = None;
    }
}

/// Builder for [`TokenManager`].
pub struct TokenManagerBuilder {
    handle: String,
    store_key: String,
    store: Option<Arc<dyn TokenStore>>,
    refresher: Arc<dyn TokenRefresher>,
    refresh_buffer: Duration,
}

impl TokenManagerBuilder {
    /// Persists tokens in `store`.
    pub fn store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Refreshes tokens this long before they expire. Defaults to five minutes.
    pub fn refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    /// Builds the manager.
    pub fn build(self) -> TokenManager {
        TokenManager {
            handle: self.handle,
            store_key: self.store_key,
            store: self.store,
            refresher: self.refresher,
            refresh_buffer: self.refresh_buffer,
            state: Mutex::new(TokenState::default()),
        }
    }
}
