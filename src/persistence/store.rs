//! Backing Store Module
//!
//! The narrow interface between the coordinator and durable storage. Stores
//! only see bytes: keys and values are marshaled before they get here, and the
//! expiration metadata travels beside the value in wall-clock form.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::Expiration;
use crate::error::StoreResult;

// == Entry Metadata ==
/// Expiration metadata persisted with a record. Timestamps are wall-clock
/// milliseconds so they survive a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub created_ms: i64,
    pub last_used_ms: i64,
    pub lifespan_ms: Option<u64>,
    pub max_idle_ms: Option<u64>,
}

impl EntryMetadata {
    pub fn expiration(&self) -> Expiration {
        Expiration {
            lifespan: self.lifespan_ms.map(Duration::from_millis),
            max_idle: self.max_idle_ms.map(Duration::from_millis),
        }
    }

    /// Wall-clock instant at which the record expires, if any.
    pub fn expiry_time_ms(&self) -> Option<i64> {
        let mortal = self
            .lifespan_ms
            .map(|l| self.created_ms.saturating_add(l as i64));
        let transient = self
            .max_idle_ms
            .map(|m| self.last_used_ms.saturating_add(m as i64));
        match (mortal, transient) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn is_expired(&self, wall_now_ms: i64) -> bool {
        self.expiry_time_ms()
            .is_some_and(|deadline| wall_now_ms >= deadline)
    }
}

// == Marshaled Entry ==
/// Opaque key and value bytes plus their metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarshaledEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub metadata: EntryMetadata,
}

/// Lazy sequence of raw records.
pub type RawEntries<'a> = Box<dyn Iterator<Item = StoreResult<MarshaledEntry>> + Send + 'a>;

// == Backing Store Trait ==
/// Durable storage used by the persistence coordinator.
///
/// Implementations must tolerate concurrent calls; the coordinator serializes
/// its own writes but reads (cache-loader misses) arrive from request threads.
pub trait BackingStore: Send + Sync + fmt::Debug {
    /// Inserts or replaces the record for `entry.key`.
    fn write(&self, entry: &MarshaledEntry) -> StoreResult<()>;

    /// Deletes a record; returns whether one existed.
    fn delete(&self, key: &[u8]) -> StoreResult<bool>;

    fn clear(&self) -> StoreResult<()>;

    /// Reads one record, expired or not.
    fn load(&self, key: &[u8]) -> StoreResult<Option<MarshaledEntry>>;

    fn contains_key(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.load(key)?.is_some())
    }

    /// Iterates every record, expired ones included.
    fn load_all_raw(&self) -> StoreResult<RawEntries<'_>>;

    fn size(&self) -> StoreResult<usize> {
        let mut count = 0;
        for entry in self.load_all_raw()? {
            entry?;
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(lifespan_ms: Option<u64>, max_idle_ms: Option<u64>) -> EntryMetadata {
        EntryMetadata {
            created_ms: 1_000,
            last_used_ms: 1_500,
            lifespan_ms,
            max_idle_ms,
        }
    }

    #[test]
    fn test_immortal_metadata_never_expires() {
        let m = metadata(None, None);
        assert_eq!(m.expiry_time_ms(), None);
        assert!(!m.is_expired(i64::MAX));
        assert!(!m.expiration().can_expire());
    }

    #[test]
    fn test_earliest_deadline_wins() {
        // lifespan deadline 3000, idle deadline 2000
        let m = metadata(Some(2_000), Some(500));
        assert_eq!(m.expiry_time_ms(), Some(2_000));
        assert!(!m.is_expired(1_999));
        assert!(m.is_expired(2_000));
    }

    #[test]
    fn test_expiration_conversion() {
        let m = metadata(Some(10), None);
        assert_eq!(m.expiration(), Expiration::immortal().with_lifespan(Duration::from_millis(10)));
    }
}
