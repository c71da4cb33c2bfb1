//! Error types for ttlkv
//!
//! Every fallible core operation returns [`Result`]. Errors fall into two
//! kinds (see [`ErrorKind`]): transient failures the caller may retry, and
//! constraint violations that will fail the same way every time.
//!
//! A missing key is not an error: `read` returns `Ok(None)`.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`StoreError`]
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for store operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // Transient errors
    // -------------------------------------------------------------------------
    /// Another operation held the key lock for longer than the lock timeout.
    #[error("lock wait timed out on key '{key}' after {waited:?}")]
    LockTimeout { key: String, waited: Duration },

    /// No session became available within the configured wait.
    #[error("session pool exhausted (waited {waited:?})")]
    PoolExhausted { waited: Duration },

    /// The session pool is shutting down.
    #[error("session pool is closed")]
    PoolClosed,

    /// The backing store failed while reading or writing.
    #[error("storage failure: {0}")]
    Storage(String),

    // -------------------------------------------------------------------------
    // Constraint errors
    // -------------------------------------------------------------------------
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// Coarse classification used by callers to decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Lock timeout, pool pressure or storage failure. Safe to retry.
    Transient,
    /// Malformed input. Retrying will not help.
    Constraint,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::LockTimeout { .. }
            | StoreError::PoolExhausted { .. }
            | StoreError::PoolClosed
            | StoreError::Storage(_) => ErrorKind::Transient,
            StoreError::InvalidKey(_) | StoreError::InvalidValue(_) => ErrorKind::Constraint,
        }
    }

    /// Returns true if the operation may succeed when retried.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}
