//! Key Lock Table
//!
//! Exclusive, key-scoped locks. Holding the lock for a key serializes every
//! read, write and delete of that key; different keys never contend.
//!
//! ```text
//!   acquire("a") ──> shard(hash("a")) ──> slot Arc<Mutex<()>> ──> lock_owned()
//!                                                                   │
//!                               bounded by the lock timeout ◄───────┘
//! ```
//!
//! Slots are created on first use and dropped from the table as soon as the
//! last holder or waiter lets go, so the table only ever tracks keys with
//! operations in flight.

use crate::error::{Result, StoreError};
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, trace};

/// Number of shards in the lock table.
const NUM_SHARDS: usize = 64;

type Slot = Arc<AsyncMutex<()>>;

#[derive(Debug)]
struct LockTable {
    shards: Vec<Mutex<HashMap<String, Slot>>>,
}

impl LockTable {
    fn shard(&self, key: &str) -> MutexGuard<'_, HashMap<String, Slot>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) % NUM_SHARDS;
        // The map stays consistent even if a holder panicked mid-insert.
        self.shards[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn slot_for(&self, key: &str) -> Slot {
        let mut slots = self.shard(key);
        Arc::clone(
            slots
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Drops the slot from the table when the table and the caller hold the
    /// only references to it.
    fn forget_if_idle(&self, key: &str, slot: &Slot) {
        let mut slots = self.shard(key);
        let idle = slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && Arc::strong_count(slot) == 2);
        if idle {
            slots.remove(key);
        }
    }
}

/// Table of exclusive per-key locks with a bounded wait.
#[derive(Debug, Clone)]
pub struct KeyLocks {
    table: Arc<LockTable>,
    timeout: Duration,
}

impl KeyLocks {
    /// Creates an empty lock table. Every acquisition waits at most `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Mutex::new(HashMap::new())).collect();
        Self {
            table: Arc::new(LockTable { shards }),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Takes the exclusive lock for `key`.
    ///
    /// Fails with [`StoreError::LockTimeout`] if the lock is not granted
    /// within the configured timeout.
    pub async fn acquire(&self, key: &str) -> Result<KeyLockGuard> {
        let slot = self.table.slot_for(key);

        match tokio::time::timeout(self.timeout, Arc::clone(&slot).lock_owned()).await {
            Ok(guard) => {
                trace!(key = key, "Key lock acquired");
                Ok(KeyLockGuard {
                    table: Arc::clone(&self.table),
                    key: key.to_owned(),
                    slot,
                    guard: Some(guard),
                })
            }
            Err(_) => {
                self.table.forget_if_idle(key, &slot);
                debug!(key = key, timeout_ms = self.timeout.as_millis(), "Key lock wait timed out");
                Err(StoreError::LockTimeout {
                    key: key.to_owned(),
                    waited: self.timeout,
                })
            }
        }
    }

    /// Number of keys with a holder or waiter.
    pub fn tracked_keys(&self) -> usize {
        self.table
            .shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }
}

/// Holds one key's lock; releases it on drop.
#[derive(Debug)]
pub struct KeyLockGuard {
    table: Arc<LockTable>,
    key: String,
    slot: Slot,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyLockGuard {
    fn drop(&mut self) {
        // Unlock first so the strong count only reflects the table, this
        // guard and any waiters.
        self.guard.take();
        self.table.forget_if_idle(&self.key, &self.slot);
        trace!(key = %self.key, "Key lock released");
    }
}
