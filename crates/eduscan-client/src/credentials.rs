//! Access-token sources and the on-disk credential store
//!
//! The controller never holds a token long-term: it asks its [`TokenSource`]
//! each time it needs to open a connection, so a token refreshed between
//! sessions is picked up on the next connect.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default lifetime of a cached identity, in minutes
pub const DEFAULT_IDENTITY_MAX_AGE_MINS: i64 = 5;

/// Provides the bearer token presented on the connection handshake
#[cfg_attr(test, mockall::automock)]
pub trait TokenSource: Send + Sync {
    /// Current token, or `None` when not logged in
    fn token(&self) -> Option<String>;
}

/// A fixed token
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Reads the token from an environment variable at connect time
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl TokenSource for EnvToken {
    fn token(&self) -> Option<String> {
        std::env::var(&self.var).ok().filter(|t| !t.trim().is_empty())
    }
}

/// Who the stored token belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Identity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            user_id: None,
            role: None,
        }
    }
}

/// File contents of a credential store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
}

/// Credential store errors
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid credential file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// JSON file holding the access token and a cached user identity
///
/// The cached identity is only trusted while it is younger than `max_age`;
/// after that [`CredentialStore::identity`] returns `None` and the caller is
/// expected to re-validate the token with the auth service.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    max_age: Duration,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_age: Duration::minutes(DEFAULT_IDENTITY_MAX_AGE_MINS),
        }
    }

    /// Set how long a cached identity stays fresh
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the store; a missing file is an empty store
    pub fn load(&self) -> Result<StoredCredentials, CredentialError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoredCredentials::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Store a token, optionally with the identity it belongs to
    pub fn save(&self, token: &str, identity: Option<Identity>) -> Result<(), CredentialError> {
        let stored = StoredCredentials {
            token: Some(token.to_string()),
            cached_at: identity.as_ref().map(|_| Utc::now()),
            identity,
        };
        self.write(&stored)
    }

    /// Remove token and identity
    pub fn clear(&self) -> Result<(), CredentialError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Cached identity, if present and not stale
    pub fn identity(&self) -> Option<Identity> {
        let stored = self.load().ok()?;
        if Self::is_fresh(&stored, self.max_age, Utc::now()) {
            stored.identity
        } else {
            None
        }
    }

    /// Whether a cached identity exists but has outlived `max_age`
    pub fn is_stale(&self) -> bool {
        match self.load() {
            Ok(stored) => {
                stored.identity.is_some() && !Self::is_fresh(&stored, self.max_age, Utc::now())
            }
            Err(_) => false,
        }
    }

    fn is_fresh(stored: &StoredCredentials, max_age: Duration, now: DateTime<Utc>) -> bool {
        match stored.cached_at {
            Some(cached_at) => now.signed_duration_since(cached_at) < max_age,
            None => false,
        }
    }

    fn write(&self, stored: &StoredCredentials) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(stored)?)?;
        debug!("Credentials written to {}", self.path.display());
        Ok(())
    }
}

impl TokenSource for CredentialStore {
    fn token(&self) -> Option<String> {
        match self.load() {
            Ok(stored) => stored.token,
            Err(e) => {
                warn!("Cannot read credentials from {}: {}", self.path.display(), e);
                None
            }
        }
    }
}
