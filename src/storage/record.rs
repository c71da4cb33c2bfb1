//! Records and persisted rows.
//!
//! A [`Row`] is what the backing store holds: key, opaque value bytes and an
//! absolute expiry in epoch seconds. A [`Record`] is what callers see, and
//! only ever for a live row.

use bytes::Bytes;

/// Expiry written by a logical delete. Always in the past, so a tombstoned
/// row is invisible until the sweeper reclaims it.
pub const TOMBSTONE: i64 = -1;

/// A stored row, live or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub key: String,
    pub value: Bytes,
    /// Absolute expiry in epoch seconds
    pub expires_at: i64,
}

impl Row {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>, expires_at: i64) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            expires_at,
        }
    }

    /// A row is live iff its expiry is strictly after `now`.
    #[inline]
    pub fn is_live_at(&self, now: i64) -> bool {
        self.expires_at > now
    }

    /// Seconds left before expiry, or 0 once expired.
    pub fn ttl_at(&self, now: i64) -> i64 {
        (self.expires_at - now).max(0)
    }
}

/// A live key-value pair as returned by `read`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: Bytes,
    pub expires_at: i64,
}

impl From<Row> for Record {
    fn from(row: Row) -> Self {
        Self {
            key: row.key,
            value: row.value,
            expires_at: row.expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_boundary() {
        let row = Row::new("a", "1", 100);
        assert!(row.is_live_at(99));
        // expires_at == now is already expired
        assert!(!row.is_live_at(100));
        assert!(!row.is_live_at(101));
    }

    #[test]
    fn test_tombstone_never_live() {
        let row = Row::new("a", "1", TOMBSTONE);
        assert!(!row.is_live_at(0));
        assert_eq!(row.ttl_at(0), 0);
    }

    #[test]
    fn test_ttl_at() {
        let row = Row::new("a", "1", 160);
        assert_eq!(row.ttl_at(100), 60);
        assert_eq!(row.ttl_at(200), 0);
    }
}
