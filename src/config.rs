//! Configuration for ttlkv
//!
//! Centralized configuration with sensible defaults.
//!
//! ```
//! use ttlkv::config::{PoolWait, StoreConfig};
//! use ttlkv::storage::SweepSchedule;
//! use std::time::Duration;
//!
//! let config = StoreConfig::default()
//!     .with_pool_size(8)
//!     .with_pool_wait(PoolWait::FailFast)
//!     .with_lock_timeout(Duration::from_secs(1))
//!     .with_sweep_schedule(SweepSchedule::cron("30 3 * * *").unwrap());
//! assert_eq!(config.pool_size, 8);
//! ```

use crate::storage::schedule::SweepSchedule;
use std::time::Duration;

/// What to do when every session in the pool is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolWait {
    /// Fail immediately with `PoolExhausted`.
    FailFast,
    /// Queue for at most this long, then fail with `PoolExhausted`.
    Bounded(Duration),
}

/// Main configuration for a store instance
#[derive(Debug, Clone)]
pub struct StoreConfig {
    // -------------------------------------------------------------------------
    // Session pool
    // -------------------------------------------------------------------------
    /// Maximum number of operations in flight at once
    pub pool_size: usize,

    /// Behaviour when the pool is exhausted
    pub pool_wait: PoolWait,

    // -------------------------------------------------------------------------
    // Locking
    // -------------------------------------------------------------------------
    /// Longest an operation waits for another operation on the same key
    pub lock_timeout: Duration,

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------
    /// Maximum key length in bytes
    pub max_key_len: usize,

    /// Maximum value length in bytes
    pub max_value_len: usize,

    // -------------------------------------------------------------------------
    // Expiry
    // -------------------------------------------------------------------------
    /// When the expiry sweeper runs
    pub sweep_schedule: SweepSchedule,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            pool_size: 20,
            pool_wait: PoolWait::Bounded(Duration::from_secs(10)),
            lock_timeout: Duration::from_secs(5),
            max_key_len: 255,
            max_value_len: 1024 * 1024, // 1 MiB
            sweep_schedule: SweepSchedule::default(),
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn with_pool_wait(mut self, wait: PoolWait) -> Self {
        self.pool_wait = wait;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_max_key_len(mut self, len: usize) -> Self {
        self.max_key_len = len;
        self
    }

    pub fn with_max_value_len(mut self, len: usize) -> Self {
        self.max_value_len = len;
        self
    }

    /// Sets when the expiry sweeper runs
    pub fn with_sweep_schedule(mut self, schedule: SweepSchedule) -> Self {
        self.sweep_schedule = schedule;
        self
    }
}
