//! Backends for exercising failure paths in tests.

use crate::error::{Result, StoreError};
use crate::storage::backend::{Backend, MemoryBackend, Mutation};
use crate::storage::record::Row;

/// Reads like an empty store; every non-empty commit fails.
#[derive(Debug, Default)]
pub(crate) struct FailingBackend {
    inner: MemoryBackend,
}

impl Backend for FailingBackend {
    fn fetch(&self, key: &str) -> Result<Option<Row>> {
        self.inner.fetch(key)
    }

    fn apply(&self, _batch: &[Mutation]) -> Result<u64> {
        Err(StoreError::Storage("disk on fire".into()))
    }

    fn row_count(&self) -> Result<usize> {
        self.inner.row_count()
    }
}
