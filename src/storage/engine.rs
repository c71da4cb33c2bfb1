//! Store Engine
//!
//! Implements `get`, `put` and `delete` on top of the session manager.
//!
//! ## Operation shape
//!
//! Every operation follows the same path, and only the middle step differs:
//!
//! ```text
//!  acquire session ─> begin ─> lock key ─> read / decide / stage ─> finish ─> release
//!                                │                                    │
//!                     bounded wait (LockTimeout)           commit or rollback,
//!                                                          locks dropped first
//! ```
//!
//! ## Design Decisions
//!
//! 1. **One key, one lock**: the exclusive key lock serializes all operations
//!    on a key, reads included. Operations only ever lock a single key, so
//!    they cannot deadlock.
//! 2. **Read-time expiry**: liveness is checked against the store clock once
//!    the lock is held, never at write time and never from a caller's clock.
//! 3. **Tombstones**: `delete` moves a live row's expiry to [`TOMBSTONE`]
//!    instead of removing it; the sweeper reclaims the row later.
//! 4. **Full replace**: `put` stages a whole new row, so two writes to a key
//!    can never interleave field by field.

use crate::clock::Clock;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::storage::backend::Mutation;
use crate::storage::locks::KeyLocks;
use crate::storage::record::{Record, Row, TOMBSTONE};
use crate::storage::session::{SessionManager, Transaction};
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Per-key serializable store with TTL-aware reads.
///
/// Designed to be wrapped in an `Arc` and shared by every request task.
///
/// # Example
///
/// ```
/// use ttlkv::clock::{Clock, ManualClock};
/// use ttlkv::config::StoreConfig;
/// use ttlkv::storage::{MemoryBackend, SessionManager, StoreEngine};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let config = StoreConfig::default();
/// let sessions = Arc::new(SessionManager::new(
///     Arc::new(MemoryBackend::new()),
///     config.pool_size,
///     config.pool_wait,
/// ));
/// let clock = ManualClock::new(1_000);
/// let engine = StoreEngine::new(sessions, Arc::new(clock.clone()), &config);
///
/// engine.put("a", "1".into(), clock.now() + 60).await.unwrap();
/// assert!(engine.get("a").await.unwrap().is_some());
///
/// clock.advance(61);
/// assert!(engine.get("a").await.unwrap().is_none());
/// # });
/// ```
#[derive(Debug)]
pub struct StoreEngine {
    sessions: Arc<SessionManager>,
    locks: KeyLocks,
    clock: Arc<dyn Clock>,
    max_key_len: usize,
    max_value_len: usize,

    /// Statistics: total get operations
    get_count: AtomicU64,
    /// Statistics: total put operations
    put_count: AtomicU64,
    /// Statistics: total delete operations
    del_count: AtomicU64,
    /// Statistics: deletes that tombstoned a live row
    tombstone_count: AtomicU64,
}

impl StoreEngine {
    pub fn new(sessions: Arc<SessionManager>, clock: Arc<dyn Clock>, config: &StoreConfig) -> Self {
        Self {
            sessions,
            locks: KeyLocks::new(config.lock_timeout),
            clock,
            max_key_len: config.max_key_len,
            max_value_len: config.max_value_len,
            get_count: AtomicU64::new(0),
            put_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            tombstone_count: AtomicU64::new(0),
        }
    }

    /// Current store time in epoch seconds.
    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Returns the record for `key`, or `None` if it is absent or expired.
    ///
    /// Expired rows that the sweeper has not reclaimed yet are treated
    /// exactly like absent ones.
    pub async fn get(&self, key: &str) -> Result<Option<Record>> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        self.validate_key(key)?;

        let mut session = self.sessions.acquire().await?;
        let mut tx = session.begin();
        let outcome = self.fetch_live(&mut tx, key).await;
        tx.finish(outcome.map(|row| row.map(Record::from)))
    }

    /// Inserts or fully replaces the row for `key`.
    ///
    /// An `expires_at` that is already in the past is accepted; the row is
    /// simply never visible and is reclaimed by the next sweep.
    pub async fn put(&self, key: &str, value: Bytes, expires_at: i64) -> Result<()> {
        self.put_count.fetch_add(1, Ordering::Relaxed);
        self.validate_key(key)?;
        self.validate_value(&value)?;

        let mut session = self.sessions.acquire().await?;
        let mut tx = session.begin();
        let outcome = match tx.lock(&self.locks, key).await {
            Ok(()) => {
                if expires_at <= self.clock.now() {
                    debug!(key = key, expires_at = expires_at, "Put with expiry already passed");
                }
                tx.stage(Mutation::Upsert(Row::new(key, value, expires_at)));
                Ok(())
            }
            Err(e) => Err(e),
        };
        tx.finish(outcome)
    }

    /// Logically deletes `key`.
    ///
    /// A live row gets its expiry moved to [`TOMBSTONE`]. Absent and expired
    /// keys are left alone, and a key that could never be stored is a no-op
    /// too, so this only fails on transient errors.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.del_count.fetch_add(1, Ordering::Relaxed);
        if self.validate_key(key).is_err() {
            return Ok(());
        }

        let mut session = self.sessions.acquire().await?;
        let mut tx = session.begin();
        let outcome = match self.fetch_live(&mut tx, key).await {
            Ok(Some(_)) => {
                tx.stage(Mutation::SetExpiry {
                    key: key.to_owned(),
                    expires_at: TOMBSTONE,
                });
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(e),
        };

        if tx.finish(outcome)? {
            self.tombstone_count.fetch_add(1, Ordering::Relaxed);
            debug!(key = key, "Key tombstoned");
        }
        Ok(())
    }

    /// Locks `key` and reads its row if it is live right now.
    async fn fetch_live(&self, tx: &mut Transaction<'_>, key: &str) -> Result<Option<Row>> {
        tx.lock(&self.locks, key).await?;
        let now = self.clock.now();
        Ok(tx.fetch(key)?.filter(|row| row.is_live_at(now)))
    }

    /// Checks that `key` is something the store can hold.
    pub fn validate_key(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey("key must not be empty".into()));
        }
        if key.len() > self.max_key_len {
            return Err(StoreError::InvalidKey(format!(
                "key is {} bytes, limit is {}",
                key.len(),
                self.max_key_len
            )));
        }
        if key.chars().any(char::is_control) {
            return Err(StoreError::InvalidKey("key contains control characters".into()));
        }
        Ok(())
    }

    fn validate_value(&self, value: &Bytes) -> Result<()> {
        if value.len() > self.max_value_len {
            return Err(StoreError::InvalidValue(format!(
                "value is {} bytes, limit is {}",
                value.len(),
                self.max_value_len
            )));
        }
        Ok(())
    }

    /// Returns operation counters.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            get_ops: self.get_count.load(Ordering::Relaxed),
            put_ops: self.put_count.load(Ordering::Relaxed),
            delete_ops: self.del_count.load(Ordering::Relaxed),
            tombstones: self.tombstone_count.load(Ordering::Relaxed),
        }
    }
}

/// Engine operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Total get operations
    pub get_ops: u64,
    /// Total put operations
    pub put_ops: u64,
    /// Total delete operations
    pub delete_ops: u64,
    /// Deletes that hit a live key
    pub tombstones: u64,
}
