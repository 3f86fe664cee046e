//! Cache Entry Module
//!
//! Defines cache entries with optional lifespan and max-idle expiration.
//!
//! A single flat type covers every expiration shape:
//! - immortal: no lifespan, no max-idle
//! - mortal: lifespan only
//! - transient: max-idle only
//! - transient-mortal: both, expiring at whichever deadline comes first

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::cache::TimeService;
use crate::persistence::EntryMetadata;

// == Expiration ==
/// Expiration settings attached to an entry at write time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Expiration {
    /// Absolute lifetime measured from creation
    pub lifespan: Option<Duration>,
    /// Maximum time between accesses
    pub max_idle: Option<Duration>,
}

impl Expiration {
    /// No expiration on either axis.
    pub const fn immortal() -> Self {
        Self {
            lifespan: None,
            max_idle: None,
        }
    }

    pub fn with_lifespan(mut self, lifespan: Duration) -> Self {
        self.lifespan = Some(lifespan);
        self
    }

    pub fn with_max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle = Some(max_idle);
        self
    }

    /// Builds expiration settings from millisecond values where a negative
    /// number disables that axis.
    pub fn from_millis(lifespan_ms: i64, max_idle_ms: i64) -> Self {
        Self {
            lifespan: millis_to_duration(lifespan_ms),
            max_idle: millis_to_duration(max_idle_ms),
        }
    }

    pub fn can_expire(&self) -> bool {
        self.lifespan.is_some() || self.max_idle.is_some()
    }
}

fn millis_to_duration(ms: i64) -> Option<Duration> {
    if ms < 0 {
        None
    } else {
        Some(Duration::from_millis(ms as u64))
    }
}

// == Entry Kind ==
/// Expiration shape of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Immortal,
    Mortal,
    Transient,
    TransientMortal,
}

// == Cache Entry ==
/// Point-in-time snapshot of a cached entry.
///
/// Snapshots are detached from the container: mutating the container later
/// never changes an entry already handed out.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<K, V> {
    /// The entry key
    pub key: K,
    /// The stored value
    pub value: V,
    /// Creation timestamp (monotonic nanoseconds)
    pub created: u64,
    /// Last access timestamp (monotonic nanoseconds)
    pub last_used: u64,
    /// Expiration settings
    pub expiration: Expiration,
}

impl<K, V> CacheEntry<K, V> {
    // == Constructor ==
    /// Creates an entry created and last used at `now`.
    pub fn new(key: K, value: V, expiration: Expiration, now: u64) -> Self {
        Self {
            key,
            value,
            created: now,
            last_used: now,
            expiration,
        }
    }

    pub fn kind(&self) -> EntryKind {
        match (self.expiration.lifespan, self.expiration.max_idle) {
            (None, None) => EntryKind::Immortal,
            (Some(_), None) => EntryKind::Mortal,
            (None, Some(_)) => EntryKind::Transient,
            (Some(_), Some(_)) => EntryKind::TransientMortal,
        }
    }

    pub fn can_expire(&self) -> bool {
        self.expiration.can_expire()
    }

    // == Expiry Time ==
    /// Returns the monotonic instant at which the entry expires, if any.
    ///
    /// For transient-mortal entries this is the earlier of the two deadlines.
    pub fn expiry_time(&self) -> Option<u64> {
        expiry_time(self.created, self.last_used, &self.expiration)
    }

    // == Is Expired ==
    /// An entry is expired once `now` reaches its expiry time.
    pub fn is_expired(&self, now: u64) -> bool {
        self.expiry_time().is_some_and(|deadline| now >= deadline)
    }

    // == Metadata ==
    /// Wall-clock metadata persisted next to the marshaled value.
    pub fn metadata(&self, time: &dyn TimeService) -> EntryMetadata {
        EntryMetadata {
            created_ms: time.to_wall_clock(self.created),
            last_used_ms: time.to_wall_clock(self.last_used),
            lifespan_ms: self.expiration.lifespan.map(|d| d.as_millis() as u64),
            max_idle_ms: self.expiration.max_idle.map(|d| d.as_millis() as u64),
        }
    }

    /// Rebuilds an entry from persisted metadata.
    pub fn from_metadata(key: K, value: V, metadata: &EntryMetadata, time: &dyn TimeService) -> Self {
        Self {
            key,
            value,
            created: time.from_wall_clock(metadata.created_ms),
            last_used: time.from_wall_clock(metadata.last_used_ms),
            expiration: metadata.expiration(),
        }
    }
}

pub(crate) fn expiry_time(created: u64, last_used: u64, expiration: &Expiration) -> Option<u64> {
    let mortal = expiration
        .lifespan
        .map(|l| created.saturating_add(l.as_nanos() as u64));
    let transient = expiration
        .max_idle
        .map(|m| last_used.saturating_add(m.as_nanos() as u64));

    match (mortal, transient) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

// == Internal Entry ==
/// Entry as held inside a segment map.
///
/// `last_used` is atomic so a reader holding only the segment read lock can
/// record the access.
#[derive(Debug)]
pub(crate) struct InternalEntry<V> {
    pub value: V,
    pub created: u64,
    last_used: AtomicU64,
    pub expiration: Expiration,
}

impl<V> InternalEntry<V> {
    pub fn new(value: V, expiration: Expiration, created: u64, last_used: u64) -> Self {
        Self {
            value,
            created,
            last_used: AtomicU64::new(last_used),
            expiration,
        }
    }

    pub fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Acquire)
    }

    pub fn touch(&self, now: u64) {
        self.last_used.fetch_max(now, Ordering::AcqRel);
    }

    pub fn is_expired(&self, now: u64) -> bool {
        expiry_time(self.created, self.last_used(), &self.expiration)
            .is_some_and(|deadline| now >= deadline)
    }

    pub fn snapshot<K>(&self, key: K) -> CacheEntry<K, V>
    where
        V: Clone,
    {
        CacheEntry {
            key,
            value: self.value.clone(),
            created: self.created,
            last_used: self.last_used(),
            expiration: self.expiration,
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ControlledTimeService;

    const SECOND: u64 = 1_000_000_000;

    #[test]
    fn test_entry_creation_immortal() {
        let entry = CacheEntry::new("k", "v", Expiration::immortal(), 10);

        assert_eq!(entry.kind(), EntryKind::Immortal);
        assert!(!entry.can_expire());
        assert!(entry.expiry_time().is_none());
        assert!(!entry.is_expired(u64::MAX));
    }

    #[test]
    fn test_entry_kinds() {
        let mortal = Expiration::immortal().with_lifespan(Duration::from_secs(1));
        let transient = Expiration::immortal().with_max_idle(Duration::from_secs(1));
        let both = mortal.with_max_idle(Duration::from_secs(1));

        assert_eq!(CacheEntry::new(1, 1, mortal, 0).kind(), EntryKind::Mortal);
        assert_eq!(CacheEntry::new(1, 1, transient, 0).kind(), EntryKind::Transient);
        assert_eq!(CacheEntry::new(1, 1, both, 0).kind(), EntryKind::TransientMortal);
    }

    #[test]
    fn test_negative_millis_disable_axis() {
        assert_eq!(Expiration::from_millis(-1, -1), Expiration::immortal());

        let exp = Expiration::from_millis(500, -1);
        assert_eq!(exp.lifespan, Some(Duration::from_millis(500)));
        assert!(exp.max_idle.is_none());
    }

    #[test]
    fn test_lifespan_boundary_condition() {
        let exp = Expiration::immortal().with_lifespan(Duration::from_secs(2));
        let entry = CacheEntry::new("k", "v", exp, SECOND);

        assert!(!entry.is_expired(3 * SECOND - 1));
        assert!(entry.is_expired(3 * SECOND), "Entry should be expired at boundary");
    }

    #[test]
    fn test_transient_mortal_uses_earliest_deadline() {
        let exp = Expiration::immortal()
            .with_lifespan(Duration::from_secs(10))
            .with_max_idle(Duration::from_secs(2));
        let mut entry = CacheEntry::new("k", "v", exp, 0);
        assert_eq!(entry.expiry_time(), Some(2 * SECOND));

        // keep touching: lifespan becomes the binding deadline
        entry.last_used = 9 * SECOND;
        assert_eq!(entry.expiry_time(), Some(10 * SECOND));
    }

    #[test]
    fn test_internal_touch_extends_idle_deadline() {
        let exp = Expiration::immortal().with_max_idle(Duration::from_secs(1));
        let internal = InternalEntry::new("v", exp, 0, 0);

        assert!(internal.is_expired(SECOND));
        internal.touch(SECOND / 2);
        assert!(!internal.is_expired(SECOND));
        assert!(internal.is_expired(SECOND + SECOND / 2));
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let internal = InternalEntry::new("v", Expiration::immortal(), 0, 50);
        internal.touch(10);
        assert_eq!(internal.last_used(), 50);
    }

    #[test]
    fn test_metadata_round_trip_preserves_remaining_life() {
        let time = ControlledTimeService::new();
        let exp = Expiration::immortal().with_lifespan(Duration::from_secs(60));
        let entry = CacheEntry::new("k".to_string(), 7u32, exp, time.time());

        time.advance(Duration::from_secs(20));
        let metadata = entry.metadata(&time);
        let restored = CacheEntry::from_metadata("k".to_string(), 7u32, &metadata, &time);

        assert_eq!(restored.created, entry.created);
        assert_eq!(restored.expiration, exp);
        assert!(!restored.is_expired(time.time()));
        time.advance(Duration::from_secs(40));
        assert!(restored.is_expired(time.time()));
    }
}
