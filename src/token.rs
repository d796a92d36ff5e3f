//! Access tokens and their persistence.
//!
//! A [`TokenStore`] maps opaque string keys (conventionally `"{handle}:{app_key}"`)
//! to at most one [`ManagedToken`]. Two implementations ship with the crate:
//! [`FileTokenStore`] for single-process deployments and [`MemoryTokenStore`]
//! for tests and short-lived processes. Shared backends (Redis, SQL, ...) plug
//! in by implementing the trait.

use crate::error::{BoxError, Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// An access token together with its absolute expiry.
///
/// Tokens are immutable values; a refresh produces a new one.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedToken {
    /// The bearer token.
    pub access_token: String,
    /// When the token stops being accepted.
    pub expire_at: DateTime<Utc>,
    /// Granted scopes, as reported by the platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl ManagedToken {
    /// Creates a token.
    pub fn new(
        access_token: impl Into<String>,
        expire_at: DateTime<Utc>,
        scope: Option<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            expire_at,
            scope,
        }
    }

    /// Returns `true` once the expiry time has passed.
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expire_at
    }

    /// Returns `true` if the token expires within `buffer` from now.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{Duration as ChronoDuration, Utc};
    /// use slshop::ManagedToken;
    /// use std::time::Duration;
    ///
    /// let token = ManagedToken::new("t", Utc::now() + ChronoDuration::minutes(3), None);
    /// assert!(!token.is_expired());
    /// assert!(token.is_expiring(Duration::from_secs(5 * 60)));
    /// assert!(!token.is_expiring(Duration::from_secs(60)));
    /// ```
    pub fn is_expiring(&self, buffer: Duration) -> bool {
        match chrono::Duration::from_std(buffer)
            .ok()
            .and_then(|buffer| Utc::now().checked_add_signed(buffer))
        {
            Some(deadline) => deadline > self.expire_at,
            None => true,
        }
    }
}

impl fmt::Debug for ManagedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedToken")
            .field("access_token", &"<redacted>")
            .field("expire_at", &self.expire_at)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Persistence backend for managed tokens.
///
/// Implementations must return `Ok(None)` for a missing key; errors are reserved
/// for backend failures.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Loads the token stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<ManagedToken>>;

    /// Stores `token` under `key`, replacing any previous value.
    async fn set(&self, key: &str, token: &ManagedToken) -> Result<()>;

    /// Removes the token stored under `key`. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;
}

fn store_error(key: &str, source: impl Into<BoxError>) -> Error {
    Error::TokenStore {
        key: key.to_owned(),
        source: source.into(),
    }
}

/// Stores each token as a JSON file named after its (sanitized) key.
///
/// Writes go through a temporary file and a rename so a crash never leaves a
/// half-written token behind. The directory is created on first write.
#[derive(Debug)]
pub struct FileTokenStore {
    dir: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileTokenStore {
    /// Creates a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns the directory tokens are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if matches!(c, ':' | '/' | '\\') { '_' } else { c })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    async fn ensure_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn get(&self, key: &str) -> Result<Option<ManagedToken>> {
        let _guard = self.lock.lock().await;
        let path = self.file_path(key);

        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_error(key, e)),
        };

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| store_error(key, e))
    }

    async fn set(&self, key: &str, token: &ManagedToken) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.ensure_dir().await.map_err(|e| store_error(key, e))?;

        let data = serde_json::to_vec_pretty(token).map_err(|e| store_error(key, e))?;
        let path = self.file_path(key);
        let tmp_path = path.with_extension("json.tmp");

        tokio::fs::write(&tmp_path, &data)
            .await
            .map_err(|e| store_error(key, e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| store_error(key, e))?;
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(store_error(key, e));
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_file(self.file_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_error(key, e)),
        }
    }
}

/// Keeps tokens in process memory. Every read returns an independent copy.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<String, ManagedToken>>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn tokens(&self) -> std::sync::MutexGuard<'_, HashMap<String, ManagedToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, key: &str) -> Result<Option<ManagedToken>> {
        Ok(self.tokens().get(key).cloned())
    }

    async fn set(&self, key: &str, token: &ManagedToken) -> Result<()> {
        self.tokens().insert(key.to_owned(), token.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.tokens().remove(key);
        Ok(())
    }
}
