//! Session and Transaction Manager
//!
//! Every unit of work runs inside exactly one [`Transaction`] on exactly one
//! [`Session`] taken from a bounded pool.
//!
//! ## Lifecycle
//!
//! ```text
//!   Idle
//!    │  SessionManager::acquire()      (bounded wait or fail fast)
//!    ▼
//!   SessionAcquired
//!    │  Session::begin()
//!    ▼
//!   TransactionOpen ──lock()/fetch()/stage()──> Executing
//!                                                  │
//!                         ┌────────────────────────┴──────────────┐
//!                         ▼                                       ▼
//!                     Committed                      Failed ─> RolledBack
//!                         │                                       │
//!                         └──────────── drop(Session) ────────────┘
//!                                            ▼
//!                                         Released
//! ```
//!
//! `commit` and `rollback` consume the transaction, so finishing twice does
//! not compile. A transaction dropped without finishing is rolled back. A
//! session returns its pool slot when dropped, which happens exactly once.
//!
//! [`Transaction::finish`] is the one place where "any failure rolls back,
//! then releases, then propagates" is applied.

use crate::config::PoolWait;
use crate::error::{Result, StoreError};
use crate::storage::backend::{Backend, Mutation};
use crate::storage::locks::{KeyLockGuard, KeyLocks};
use crate::storage::record::Row;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info, trace, warn};

/// Bounded pool of exclusive sessions against one backend.
///
/// The pool's size is fixed at construction; nothing else allocates or
/// resizes it.
#[derive(Debug)]
pub struct SessionManager {
    backend: Arc<dyn Backend>,
    permits: Arc<Semaphore>,
    capacity: usize,
    wait: PoolWait,
    closing: AtomicBool,
    next_id: AtomicU64,
}

impl SessionManager {
    /// Creates a pool of `capacity` sessions (at least one).
    pub fn new(backend: Arc<dyn Backend>, capacity: usize, wait: PoolWait) -> Self {
        let capacity = capacity.max(1);
        Self {
            backend,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            wait,
            closing: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    /// Takes a session from the pool.
    ///
    /// With [`PoolWait::FailFast`] this never waits; with
    /// [`PoolWait::Bounded`] it queues for at most the configured duration.
    /// Either way an exhausted pool yields [`StoreError::PoolExhausted`].
    pub async fn acquire(&self) -> Result<Session> {
        if self.closing.load(Ordering::Acquire) {
            return Err(StoreError::PoolClosed);
        }

        let permit = match self.wait {
            PoolWait::FailFast => match Arc::clone(&self.permits).try_acquire_owned() {
                Ok(permit) => permit,
                Err(TryAcquireError::NoPermits) => {
                    return Err(StoreError::PoolExhausted {
                        waited: Duration::ZERO,
                    })
                }
                Err(TryAcquireError::Closed) => return Err(StoreError::PoolClosed),
            },
            PoolWait::Bounded(wait) => {
                match tokio::time::timeout(wait, Arc::clone(&self.permits).acquire_owned()).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return Err(StoreError::PoolClosed),
                    Err(_) => {
                        debug!(wait_ms = wait.as_millis(), "Session pool wait timed out");
                        return Err(StoreError::PoolExhausted { waited: wait });
                    }
                }
            }
        };

        // Close may have started while we were queued.
        if self.closing.load(Ordering::Acquire) {
            return Err(StoreError::PoolClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!(session = id, available = self.available(), "Session acquired");

        Ok(Session {
            id,
            backend: Arc::clone(&self.backend),
            _permit: permit,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sessions currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Refuses new acquisitions, then waits for every in-flight session to
    /// come back.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(in_use = self.in_use(), "Draining session pool");

        if let Ok(all) = Arc::clone(&self.permits)
            .acquire_many_owned(self.capacity as u32)
            .await
        {
            self.permits.close();
            drop(all);
        }
        info!("Session pool closed");
    }
}

/// An exclusive handle to the backing store.
#[derive(Debug)]
pub struct Session {
    id: u64,
    backend: Arc<dyn Backend>,
    _permit: OwnedSemaphorePermit,
}

impl Session {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Opens a transaction. Only one can be open per session at a time.
    pub fn begin(&mut self) -> Transaction<'_> {
        trace!(session = self.id, "Transaction open");
        Transaction {
            session: self,
            staged: Vec::new(),
            locks: Vec::new(),
            finished: false,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        trace!(session = self.id, "Session released");
    }
}

/// One atomic unit of work.
///
/// Reads go straight to the backend (overlaid with this transaction's own
/// staged writes); writes are staged and only reach the backend on commit.
/// Key locks taken through [`Transaction::lock`] are held until the
/// transaction ends.
#[derive(Debug)]
pub struct Transaction<'s> {
    session: &'s mut Session,
    staged: Vec<Mutation>,
    locks: Vec<KeyLockGuard>,
    finished: bool,
}

impl Transaction<'_> {
    /// Takes the exclusive lock for `key` and holds it until commit or
    /// rollback.
    pub async fn lock(&mut self, locks: &KeyLocks, key: &str) -> Result<()> {
        let guard = locks.acquire(key).await?;
        self.locks.push(guard);
        Ok(())
    }

    /// Reads the physical row for `key` as this transaction would leave it.
    pub fn fetch(&self, key: &str) -> Result<Option<Row>> {
        let mut row = self.session.backend.fetch(key)?;
        for mutation in &self.staged {
            match mutation {
                Mutation::Upsert(staged) if staged.key == key => row = Some(staged.clone()),
                Mutation::SetExpiry {
                    key: staged_key,
                    expires_at,
                } if staged_key == key => {
                    if let Some(r) = row.as_mut() {
                        r.expires_at = *expires_at;
                    }
                }
                Mutation::PurgeExpired { cutoff } => {
                    row = row.filter(|r| r.expires_at > *cutoff);
                }
                _ => {}
            }
        }
        Ok(row)
    }

    /// Queues a write for commit.
    pub fn stage(&mut self, mutation: Mutation) {
        self.staged.push(mutation);
    }

    pub fn staged(&self) -> &[Mutation] {
        &self.staged
    }

    /// Applies the staged writes and releases held locks.
    ///
    /// If the backend rejects the batch the error is returned and nothing
    /// after the failing mutation is applied. Returns the number of affected
    /// rows.
    pub fn commit(mut self) -> Result<u64> {
        self.finished = true;
        let staged = std::mem::take(&mut self.staged);

        let result = if staged.is_empty() {
            Ok(0)
        } else {
            self.session.backend.apply(&staged)
        };
        self.locks.clear();

        match &result {
            Ok(affected) => trace!(
                session = self.session.id,
                mutations = staged.len(),
                affected = affected,
                "Transaction committed"
            ),
            Err(e) => warn!(
                session = self.session.id,
                error = %e,
                "Commit failed, remaining staged writes discarded"
            ),
        }
        result
    }

    /// Discards staged writes and releases held locks.
    pub fn rollback(mut self) {
        self.abort();
        trace!(session = self.session.id, "Transaction rolled back");
    }

    /// Commits on `Ok`, rolls back on `Err`, and hands the outcome back.
    pub fn finish<T>(self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => self.commit().map(|_| value),
            Err(err) => {
                debug!(error = %err, "Operation failed, rolling back");
                self.rollback();
                Err(err)
            }
        }
    }

    fn abort(&mut self) {
        self.finished = true;
        self.staged.clear();
        self.locks.clear();
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                session = self.session.id,
                staged = self.staged.len(),
                "Transaction dropped while open, rolling back"
            );
            self.abort();
        }
    }
}
