//! Bearer token handling
//!
//! The request pipeline reads tokens through [`TokenProvider`] and clears
//! them on a 401. [`StoredTokenProvider`] keeps the token and its expiry in
//! the [`StorageAdapter`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::clock::SharedClock;
use crate::error::RawError;
use crate::storage::{SetOptions, StorageAdapter, StorageError};

const TOKEN_KEY: &str = "auth_token";
const EXPIRY_KEY: &str = "auth_token_expiry";

/// Authentication errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthError {
    #[error("Session expired")]
    SessionExpired,

    #[error("Token storage failed: {0}")]
    Storage(#[from] StorageError),
}

impl From<AuthError> for RawError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::SessionExpired => RawError::SessionExpired,
            AuthError::Storage(e) => RawError::Storage(e),
        }
    }
}

/// Signals broadcast by the pipeline to the application shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A request came back 401 and the stored token was cleared
    Unauthorized { url: String },
    /// The stored token passed its expiry
    SessionExpired { url: String },
}

/// Source of the bearer token attached to authenticated requests
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current token; `Err(SessionExpired)` once its expiry has passed
    async fn token(&self) -> Result<Option<String>, AuthError>;

    async fn set_token(&self, token: &str, expires_at: Option<DateTime<Utc>>) -> Result<(), AuthError>;

    async fn clear(&self) -> Result<(), AuthError>;

    async fn is_expired(&self) -> bool {
        matches!(self.token().await, Err(AuthError::SessionExpired))
    }
}

/// Token provider persisting through the storage adapter
#[derive(Debug, Clone)]
pub struct StoredTokenProvider {
    storage: Arc<StorageAdapter>,
    clock: SharedClock,
}

impl StoredTokenProvider {
    pub fn new(storage: Arc<StorageAdapter>, clock: SharedClock) -> Self {
        Self { storage, clock }
    }
}

#[async_trait]
impl TokenProvider for StoredTokenProvider {
    async fn token(&self) -> Result<Option<String>, AuthError> {
        let Some(token) = self.storage.get_opt::<String>(TOKEN_KEY) else {
            return Ok(None);
        };
        match self.storage.get_opt::<i64>(EXPIRY_KEY) {
            Some(expiry) if self.clock.now_millis() >= expiry => Err(AuthError::SessionExpired),
            _ => Ok(Some(token)),
        }
    }

    async fn set_token(&self, token: &str, expires_at: Option<DateTime<Utc>>) -> Result<(), AuthError> {
        self.storage
            .set(TOKEN_KEY, token, SetOptions::default().encrypted())?;
        match expires_at {
            Some(at) => self
                .storage
                .set(EXPIRY_KEY, &at.timestamp_millis(), SetOptions::default())?,
            None => self.storage.remove(EXPIRY_KEY)?,
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), AuthError> {
        self.storage.remove(TOKEN_KEY)?;
        self.storage.remove(EXPIRY_KEY)?;
        Ok(())
    }
}
