//! Backing Store
//!
//! The transaction layer talks to storage only through the [`Backend`] trait,
//! so the same begin/commit/rollback contract ports to any store that can
//! fetch a row by key and apply a batch of row mutations.
//!
//! [`MemoryBackend`] is the bundled implementation: an in-memory row table
//! split into shards, each behind its own `RwLock`.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     MemoryBackend                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Shard locks are held only for the duration of a single map access; the
//! per-key serialization that callers rely on comes from the key lock table,
//! not from these locks.

use crate::error::{Result, StoreError};
use crate::storage::record::Row;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Number of shards in the in-memory row table.
const NUM_SHARDS: usize = 64;

/// A row-level change staged by a transaction and applied on commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Insert the row, or replace every field of an existing row.
    Upsert(Row),
    /// Move an existing row's expiry. No-op if the row is gone.
    SetExpiry { key: String, expires_at: i64 },
    /// Physically remove every row with `expires_at <= cutoff`.
    PurgeExpired { cutoff: i64 },
}

impl Mutation {
    /// The single key this mutation touches, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Mutation::Upsert(row) => Some(&row.key),
            Mutation::SetExpiry { key, .. } => Some(key),
            Mutation::PurgeExpired { .. } => None,
        }
    }
}

/// Storage technology behind the session pool.
pub trait Backend: Send + Sync + Debug + 'static {
    /// Reads the physical row for `key`, expired or not.
    fn fetch(&self, key: &str) -> Result<Option<Row>>;

    /// Applies a committed batch in order and returns the number of rows
    /// affected.
    ///
    /// Atomic per single-key mutation only. On error, earlier mutations stay
    /// applied, and a failed `PurgeExpired` may already have purged some
    /// shards; what it left behind is still expired and the next purge takes
    /// it.
    fn apply(&self, batch: &[Mutation]) -> Result<u64>;

    /// Number of physically stored rows, including expired ones.
    fn row_count(&self) -> Result<usize>;
}

/// Sharded in-memory row table.
#[derive(Debug)]
pub struct MemoryBackend {
    shards: Vec<RwLock<HashMap<String, Row>>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS).map(|_| RwLock::new(HashMap::new())).collect();
        Self { shards }
    }

    /// Determines which shard a key belongs to.
    #[inline]
    fn shard_index(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    fn read_shard(&self, index: usize) -> Result<RwLockReadGuard<'_, HashMap<String, Row>>> {
        self.shards[index]
            .read()
            .map_err(|_| StoreError::Storage(format!("shard {} lock poisoned", index)))
    }

    fn write_shard(&self, index: usize) -> Result<RwLockWriteGuard<'_, HashMap<String, Row>>> {
        self.shards[index]
            .write()
            .map_err(|_| StoreError::Storage(format!("shard {} lock poisoned", index)))
    }

    fn apply_one(&self, mutation: &Mutation) -> Result<u64> {
        match mutation {
            Mutation::Upsert(row) => {
                let mut rows = self.write_shard(self.shard_index(&row.key))?;
                rows.insert(row.key.clone(), row.clone());
                Ok(1)
            }
            Mutation::SetExpiry { key, expires_at } => {
                let mut rows = self.write_shard(self.shard_index(key))?;
                match rows.get_mut(key) {
                    Some(row) => {
                        row.expires_at = *expires_at;
                        Ok(1)
                    }
                    None => Ok(0),
                }
            }
            Mutation::PurgeExpired { cutoff } => {
                let mut removed = 0u64;
                for index in 0..self.shards.len() {
                    let mut rows = self.write_shard(index)?;
                    let before = rows.len();
                    rows.retain(|_, row| row.expires_at > *cutoff);
                    removed += (before - rows.len()) as u64;
                }
                Ok(removed)
            }
        }
    }
}

impl Backend for MemoryBackend {
    fn fetch(&self, key: &str) -> Result<Option<Row>> {
        let rows = self.read_shard(self.shard_index(key))?;
        Ok(rows.get(key).cloned())
    }

    fn apply(&self, batch: &[Mutation]) -> Result<u64> {
        let mut affected = 0;
        for mutation in batch {
            affected += self.apply_one(mutation)?;
        }
        Ok(affected)
    }

    fn row_count(&self) -> Result<usize> {
        let mut total = 0;
        for index in 0..self.shards.len() {
            total += self.read_shard(index)?.len();
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::record::TOMBSTONE;

    #[test]
    fn test_upsert_and_fetch() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.fetch("a").unwrap(), None);

        let affected = backend.apply(&[Mutation::Upsert(Row::new("a", "1", 100))]).unwrap();
        assert_eq!(affected, 1);
        assert_eq!(backend.fetch("a").unwrap(), Some(Row::new("a", "1", 100)));
    }

    #[test]
    fn test_upsert_replaces_whole_row() {
        let backend = MemoryBackend::new();
        backend.apply(&[Mutation::Upsert(Row::new("a", "1", 100))]).unwrap();
        backend.apply(&[Mutation::Upsert(Row::new("a", "2", 50))]).unwrap();

        assert_eq!(backend.fetch("a").unwrap(), Some(Row::new("a", "2", 50)));
        assert_eq!(backend.row_count().unwrap(), 1);
    }

    #[test]
    fn test_set_expiry_on_missing_row_is_noop() {
        let backend = MemoryBackend::new();
        let affected = backend
            .apply(&[Mutation::SetExpiry {
                key: "ghost".into(),
                expires_at: TOMBSTONE,
            }])
            .unwrap();
        assert_eq!(affected, 0);
        assert_eq!(backend.row_count().unwrap(), 0);
    }

    #[test]
    fn test_purge_expired_uses_inclusive_cutoff() {
        let backend = MemoryBackend::new();
        backend
            .apply(&[
                Mutation::Upsert(Row::new("old", "v", 90)),
                Mutation::Upsert(Row::new("edge", "v", 100)),
                Mutation::Upsert(Row::new("dead", "v", TOMBSTONE)),
                Mutation::Upsert(Row::new("fresh", "v", 101)),
            ])
            .unwrap();

        let removed = backend.apply(&[Mutation::PurgeExpired { cutoff: 100 }]).unwrap();
        assert_eq!(removed, 3);
        assert_eq!(backend.row_count().unwrap(), 1);
        assert!(backend.fetch("fresh").unwrap().is_some());
    }

    #[test]
    fn test_purge_on_poisoned_shard_fails_part_way() {
        use std::panic::{catch_unwind, AssertUnwindSafe};

        let backend = MemoryBackend::new();
        let keys: Vec<String> = (0..500).map(|i| format!("key-{}", i)).collect();
        let batch: Vec<_> = keys
            .iter()
            .map(|k| Mutation::Upsert(Row::new(k.clone(), "v", 10)))
            .collect();
        backend.apply(&batch).unwrap();

        let last = NUM_SHARDS - 1;
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = backend.shards[last].write().unwrap();
            panic!("poison shard");
        }));

        let err = backend.apply(&[Mutation::PurgeExpired { cutoff: 10 }]).unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));

        // shards before the poisoned one were purged
        let mut checked = 0;
        for key in keys.iter().filter(|k| backend.shard_index(k) != last) {
            assert_eq!(backend.fetch(key).unwrap(), None);
            checked += 1;
        }
        assert!(checked > 0);
        assert!(backend.row_count().is_err());
    }

    #[test]
    fn test_mutation_key() {
        assert_eq!(Mutation::Upsert(Row::new("k", "v", 1)).key(), Some("k"));
        assert_eq!(Mutation::PurgeExpired { cutoff: 0 }.key(), None);
    }

    #[test]
    fn test_keys_spread_over_shards() {
        let backend = MemoryBackend::new();
        let batch: Vec<_> = (0..1000)
            .map(|i| Mutation::Upsert(Row::new(format!("key-{}", i), "v", 10)))
            .collect();
        backend.apply(&batch).unwrap();

        assert_eq!(backend.row_count().unwrap(), 1000);
        let used = backend
            .shards
            .iter()
            .filter(|s| !s.read().unwrap().is_empty())
            .count();
        assert!(used > NUM_SHARDS / 2);
    }
}
