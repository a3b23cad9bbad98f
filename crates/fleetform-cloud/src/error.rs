//! Engine and provider error types

use chrono::{DateTime, Utc};
use fleetform_core::{ResourceAddress, ValidationError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned by a `ResourceProvider`.
///
/// The provider classifies every failure; the executor only retries
/// `Transient` ones.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ProviderError {
    /// Rate limiting, timeouts, dropped connections
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Validation, quota exceeded, conflicts
    #[error("provider error: {0}")]
    Permanent(String),

    #[error("resource not found: {0}")]
    NotFound(String),
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("no provider registered for resource type: {0}")]
    ProviderNotFound(String),

    #[error("{address}: {source}")]
    Provider {
        address: ResourceAddress,
        #[source]
        source: ProviderError,
    },

    #[error(
        "state is locked by {holder} since {acquired_at} (token {token}){}",
        stale_hint(.stale)
    )]
    LockHeld {
        holder: String,
        token: String,
        acquired_at: DateTime<Utc>,
        stale: bool,
    },

    #[error("lock token mismatch: {0}")]
    LockMismatch(String),

    #[error("state serial changed underneath the session (expected {expected}, found {found})")]
    StateConflict { expected: u64, found: u64 },

    #[error("{0} is deletion-protected and was not destroyed")]
    DeletionProtected(ResourceAddress),

    #[error("state file error: {0}")]
    StateError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn stale_hint(stale: &bool) -> &'static str {
    if *stale {
        "; the lock is older than the timeout, release it with force-unlock if its holder is gone"
    } else {
        ""
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
