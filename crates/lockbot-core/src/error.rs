use thiserror::Error;

use crate::model::Lock;
use crate::store::Item;

/// Failure signals reported by a raw store backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The write predicate did not hold; nothing was written.
    #[error("conditional check failed")]
    ConditionFailed,

    /// Throttling or another transient fault that is safe to retry.
    #[error("throttled: {0}")]
    Throttled(String),

    #[error("{0}")]
    Other(String),
}

/// Errors surfaced by the store adapter.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The predicate failed. Carries the record read right after the failure.
    #[error("conditional write rejected")]
    Conflict(Option<Item>),

    #[error("store unavailable after {attempts} attempts: {message}")]
    Unavailable { attempts: u32, message: String },

    #[error("store error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors returned by lock operations.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("lock is held by {}", .0.holder)]
    Conflict(Box<Lock>),

    #[error("lock not found")]
    NotFound,

    #[error("lock is held by {holder}")]
    Forbidden { holder: String },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("store error: {0}")]
    Store(String),
}

impl From<StoreError> for LockError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { .. } => LockError::StoreUnavailable(err.to_string()),
            StoreError::Conflict(_) => LockError::Store("unexpected conditional failure".into()),
            StoreError::Backend(msg) | StoreError::Serialization(msg) => LockError::Store(msg),
        }
    }
}

/// Reasons a state token is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateTokenError {
    #[error("state token is malformed")]
    Malformed,

    #[error("state token signature is invalid")]
    InvalidSignature,

    #[error("state token has expired")]
    Expired,

    #[error("state token was already used")]
    Replayed,

    #[error("state token was issued for team {expected}, not {actual}")]
    TeamMismatch { expected: String, actual: String },
}

/// Errors returned by the token manager.
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("team {0} has not installed the app")]
    NotInstalled(String),

    #[error("invalid or missing access token")]
    InvalidToken,

    #[error("invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    StateToken(#[from] StateTokenError),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("store error: {0}")]
    Store(String),
}

impl From<StoreError> for TokenError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { .. } => TokenError::StoreUnavailable(err.to_string()),
            StoreError::Conflict(_) => TokenError::Store("unexpected conditional failure".into()),
            StoreError::Backend(msg) | StoreError::Serialization(msg) => TokenError::Store(msg),
        }
    }
}
