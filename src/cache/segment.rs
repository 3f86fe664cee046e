//! Segment Module
//!
//! One shard of the data container: a hash index plus its own eviction
//! ordering structure.
//!
//! Lock order is always `entries` then `policy`. Writers hold both, so every
//! resident key has exactly one ordering node when the write lock is released.
//! Readers hold only the `entries` read lock and `try_lock` the policy: when the
//! policy is contended the access update is abandoned and the ordering simply
//! becomes approximate.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::cache::entry::InternalEntry;
use crate::cache::{CacheEntry, EvictionPolicy, Expiration};

// == Put Outcome ==
/// Result of a write into a segment.
#[derive(Debug)]
pub(crate) struct PutOutcome<K, V> {
    /// Live entry replaced by the write
    pub previous: Option<CacheEntry<K, V>>,
    /// Entries evicted to make room
    pub evicted: Vec<CacheEntry<K, V>>,
}

// == Lookup ==
/// Result of a read that records the access.
#[derive(Debug, PartialEq)]
pub(crate) enum Lookup<K, V> {
    Hit(CacheEntry<K, V>),
    Miss,
    /// Present but past its expiry; the caller decides whether to remove it
    Expired,
}

// == Segment ==
pub(crate) struct Segment<K, V> {
    id: u32,
    entries: RwLock<HashMap<K, InternalEntry<V>>>,
    policy: Mutex<Box<dyn EvictionPolicy<K>>>,
    /// None = unbounded
    capacity: Option<usize>,
}

impl<K, V> Segment<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(id: u32, policy: Box<dyn EvictionPolicy<K>>, capacity: Option<usize>) -> Self {
        Self {
            id,
            entries: RwLock::new(HashMap::new()),
            policy: Mutex::new(policy),
            capacity,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    // == Get ==
    /// Returns a live entry, recording the access.
    pub fn get(&self, key: &K, now: u64) -> Lookup<K, V> {
        let entries = self.entries.read();
        let Some(entry) = entries.get(key) else {
            return Lookup::Miss;
        };
        if entry.is_expired(now) {
            return Lookup::Expired;
        }
        entry.touch(now);
        if let Some(mut policy) = self.policy.try_lock() {
            policy.on_access(key);
        }
        Lookup::Hit(entry.snapshot(key.clone()))
    }

    // == Peek ==
    /// Reads without touching timestamps or ordering; expired entries are hidden.
    pub fn peek(&self, key: &K, now: u64) -> Option<CacheEntry<K, V>> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.snapshot(key.clone()))
    }

    pub fn contains_key(&self, key: &K, now: u64) -> bool {
        self.entries
            .read()
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    // == Put ==
    pub fn put(&self, key: K, value: V, expiration: Expiration, now: u64) -> PutOutcome<K, V> {
        let entry = InternalEntry::new(value, expiration, now, now);
        self.insert(key, entry, now)
    }

    /// Inserts an entry carrying its own timestamps (preload, activation).
    pub fn insert_entry(&self, entry: CacheEntry<K, V>, now: u64) -> PutOutcome<K, V> {
        let internal = InternalEntry::new(entry.value, entry.expiration, entry.created, entry.last_used);
        self.insert(entry.key, internal, now)
    }

    fn insert(&self, key: K, entry: InternalEntry<V>, now: u64) -> PutOutcome<K, V> {
        let mut entries = self.entries.write();
        let mut policy = self.policy.lock();

        let previous = entries.insert(key.clone(), entry);
        match previous {
            Some(_) => policy.on_access(&key),
            None => policy.on_insert(&key),
        }
        let previous = previous
            .filter(|prev| !prev.is_expired(now))
            .map(|prev| prev.snapshot(key.clone()));

        let evicted = self.evict_overflow(&mut entries, &mut **policy, &key);
        PutOutcome { previous, evicted }
    }

    // == Put If Absent ==
    /// Inserts only when no live entry exists; returns the live entry otherwise.
    pub fn put_if_absent(&self, entry: CacheEntry<K, V>, now: u64) -> Result<PutOutcome<K, V>, CacheEntry<K, V>> {
        {
            let entries = self.entries.read();
            if let Some(existing) = entries.get(&entry.key).filter(|e| !e.is_expired(now)) {
                return Err(existing.snapshot(entry.key.clone()));
            }
        }
        let mut entries = self.entries.write();
        let mut policy = self.policy.lock();
        if let Some(existing) = entries.get(&entry.key).filter(|e| !e.is_expired(now)) {
            return Err(existing.snapshot(entry.key.clone()));
        }

        let key = entry.key.clone();
        let internal = InternalEntry::new(entry.value, entry.expiration, entry.created, entry.last_used);
        match entries.insert(key.clone(), internal) {
            Some(_) => policy.on_access(&key),
            None => policy.on_insert(&key),
        }
        let evicted = self.evict_overflow(&mut entries, &mut **policy, &key);
        Ok(PutOutcome {
            previous: None,
            evicted,
        })
    }

    // == Eviction ==
    /// Evicts victims until the segment is back within capacity.
    ///
    /// A victim the index no longer holds is a stale ordering node; it is
    /// dropped from the policy and selection continues.
    fn evict_overflow(
        &self,
        entries: &mut HashMap<K, InternalEntry<V>>,
        policy: &mut dyn EvictionPolicy<K>,
        inserted: &K,
    ) -> Vec<CacheEntry<K, V>> {
        let Some(capacity) = self.capacity else {
            return Vec::new();
        };

        let mut evicted = Vec::new();
        while entries.len() > capacity {
            let Some(victim) = policy.select_victim(inserted) else {
                break;
            };
            match entries.remove(&victim) {
                Some(entry) => {
                    policy.on_evict(&victim);
                    evicted.push(entry.snapshot(victim));
                }
                None => policy.on_remove(&victim),
            }
        }
        if !evicted.is_empty() {
            debug!("Segment {}: evicted {} entries", self.id, evicted.len());
        }
        evicted
    }

    // == Remove ==
    /// Removes a key from the index and the ordering structure together.
    ///
    /// Returns the entry only if it was still live.
    pub fn remove(&self, key: &K, now: u64) -> Option<CacheEntry<K, V>> {
        let mut entries = self.entries.write();
        let mut policy = self.policy.lock();
        let removed = entries.remove(key)?;
        policy.on_remove(key);
        (!removed.is_expired(now)).then(|| removed.snapshot(key.clone()))
    }

    /// Removes the key only if it is expired at `now`.
    pub fn remove_if_expired(&self, key: &K, now: u64) -> Option<CacheEntry<K, V>> {
        let mut entries = self.entries.write();
        if !entries.get(key)?.is_expired(now) {
            return None;
        }
        let mut policy = self.policy.lock();
        let removed = entries.remove(key)?;
        policy.on_remove(key);
        Some(removed.snapshot(key.clone()))
    }

    // == Clear ==
    /// Empties the index and the ordering structure; returns the number dropped.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let mut policy = self.policy.lock();
        let count = entries.len();
        entries.clear();
        policy.clear();
        count
    }

    // == Purge Expired ==
    pub fn purge_expired(&self, now: u64) -> Vec<CacheEntry<K, V>> {
        let mut entries = self.entries.write();
        let expired: Vec<K> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        if expired.is_empty() {
            return Vec::new();
        }

        let mut policy = self.policy.lock();
        expired
            .into_iter()
            .filter_map(|key| {
                let entry = entries.remove(&key)?;
                policy.on_remove(&key);
                Some(entry.snapshot(key))
            })
            .collect()
    }

    // == Snapshot ==
    /// Copies the segment's entries out under the read lock.
    pub fn snapshot(&self, include_expired: bool, now: u64) -> Vec<CacheEntry<K, V>> {
        self.entries
            .read()
            .iter()
            .filter(|(_, entry)| include_expired || !entry.is_expired(now))
            .map(|(key, entry)| entry.snapshot(key.clone()))
            .collect()
    }

    /// Entries held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn live_len(&self, now: u64) -> usize {
        self.entries
            .read()
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn ordering_len(&self) -> usize {
        self.policy.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EvictionStrategy;
    use std::time::Duration;

    fn lru_segment(capacity: usize) -> Segment<String, u32> {
        Segment::new(0, EvictionStrategy::Lru.build(capacity), Some(capacity))
    }

    #[test]
    fn test_put_reports_previous_live_entry() {
        let segment = lru_segment(4);
        assert!(segment.put("a".into(), 1, Expiration::immortal(), 0).previous.is_none());

        let outcome = segment.put("a".into(), 2, Expiration::immortal(), 1);
        assert_eq!(outcome.previous.map(|e| e.value), Some(1));
        assert_eq!(segment.len(), 1);
    }

    #[test]
    fn test_expired_previous_is_not_reported() {
        let segment = lru_segment(4);
        let short = Expiration::immortal().with_lifespan(Duration::from_nanos(10));
        segment.put("a".into(), 1, short, 0);

        let outcome = segment.put("a".into(), 2, Expiration::immortal(), 100);
        assert!(outcome.previous.is_none());
    }

    #[test]
    fn test_get_reports_expired_then_miss() {
        let segment = lru_segment(4);
        let short = Expiration::immortal().with_lifespan(Duration::from_nanos(10));
        segment.put("a".into(), 1, short, 0);

        assert!(matches!(segment.get(&"a".to_string(), 5), Lookup::Hit(_)));
        assert_eq!(segment.get(&"a".to_string(), 10), Lookup::Expired);
        assert!(segment.remove_if_expired(&"a".to_string(), 10).is_some());
        assert_eq!(segment.get(&"a".to_string(), 10), Lookup::Miss);
    }

    #[test]
    fn test_eviction_excludes_inserted_key() {
        let segment = lru_segment(2);
        segment.put("a".into(), 1, Expiration::immortal(), 0);
        segment.put("b".into(), 2, Expiration::immortal(), 1);

        let outcome = segment.put("c".into(), 3, Expiration::immortal(), 2);
        let evicted: Vec<String> = outcome.evicted.into_iter().map(|e| e.key).collect();

        assert_eq!(evicted, vec!["a".to_string()]);
        assert_eq!(segment.len(), 2);
        assert_eq!(segment.ordering_len(), 2);
    }

    #[test]
    fn test_remove_unlinks_ordering_node() {
        let segment = lru_segment(4);
        segment.put("a".into(), 1, Expiration::immortal(), 0);
        segment.put("b".into(), 2, Expiration::immortal(), 0);

        assert!(segment.remove(&"a".to_string(), 0).is_some());
        assert_eq!(segment.ordering_len(), 1);
        assert!(segment.remove(&"a".to_string(), 0).is_none());
    }

    #[test]
    fn test_put_if_absent_keeps_live_entry() {
        let segment = lru_segment(4);
        segment.put("a".into(), 1, Expiration::immortal(), 0);

        let existing = segment
            .put_if_absent(CacheEntry::new("a".into(), 9, Expiration::immortal(), 1), 1)
            .unwrap_err();
        assert_eq!(existing.value, 1);
        assert!(segment
            .put_if_absent(CacheEntry::new("b".into(), 2, Expiration::immortal(), 1), 1)
            .is_ok());
    }

    #[test]
    fn test_clear_resets_ordering() {
        let segment = lru_segment(4);
        segment.put("a".into(), 1, Expiration::immortal(), 0);
        segment.put("b".into(), 2, Expiration::immortal(), 0);

        assert_eq!(segment.clear(), 2);
        assert_eq!(segment.len(), 0);
        assert_eq!(segment.ordering_len(), 0);
    }

    #[test]
    fn test_purge_expired_only_removes_expired() {
        let segment = lru_segment(4);
        let short = Expiration::immortal().with_lifespan(Duration::from_nanos(10));
        segment.put("a".into(), 1, short, 0);
        segment.put("b".into(), 2, Expiration::immortal(), 0);

        let purged = segment.purge_expired(20);
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].key, "a");
        assert_eq!(segment.len(), 1);
        assert_eq!(segment.ordering_len(), 1);
    }
}
