//! Data Container Module
//!
//! The segmented in-memory store. Keys are routed to a segment by the key
//! partitioner; each segment owns its map, its lock and its eviction ordering,
//! so there is no container-wide lock on any path.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use tracing::debug;

use crate::cache::segment::{Lookup, PutOutcome, Segment};
use crate::cache::{
    distribute_capacity, CacheEntry, CacheStats, EvictionStrategy, Expiration, StatsCollector,
    TimeService,
};
use crate::distribution::KeyPartitioner;

/// Callback receiving every entry evicted for capacity.
pub type EvictionListener<K, V> = Arc<dyn Fn(&CacheEntry<K, V>) + Send + Sync>;

// == Container Config ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerConfig {
    pub num_segments: u32,
    /// Global entry bound, split across segments. None = unbounded
    pub max_entries: Option<usize>,
    pub strategy: EvictionStrategy,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            num_segments: 256,
            max_entries: None,
            strategy: EvictionStrategy::None,
        }
    }
}

// == Data Container ==
pub struct DataContainer<K, V> {
    segments: Vec<Segment<K, V>>,
    partitioner: KeyPartitioner,
    time: Arc<dyn TimeService>,
    stats: Arc<StatsCollector>,
    eviction_listener: Option<EvictionListener<K, V>>,
}

impl<K, V> fmt::Debug for DataContainer<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataContainer")
            .field("num_segments", &self.segments.len())
            .field("partitioner", &self.partitioner)
            .finish()
    }
}

impl<K, V> DataContainer<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a container with one segment per configured segment id.
    ///
    /// When eviction is enabled the global bound is split so that every
    /// segment holds at least one entry.
    pub fn new(config: ContainerConfig, time: Arc<dyn TimeService>) -> Self {
        let partitioner = KeyPartitioner::new(config.num_segments);
        let num_segments = partitioner.num_segments() as usize;

        let capacities: Vec<Option<usize>> = match config.max_entries {
            Some(max) if config.strategy.is_enabled() => distribute_capacity(max, num_segments)
                .into_iter()
                .map(Some)
                .collect(),
            _ => vec![None; num_segments],
        };

        let segments = capacities
            .into_iter()
            .enumerate()
            .map(|(id, capacity)| {
                let policy = config.strategy.build(capacity.unwrap_or(0));
                Segment::new(id as u32, policy, capacity)
            })
            .collect();

        debug!(
            "Created data container: {} segments, strategy {}, max entries {:?}",
            num_segments, config.strategy, config.max_entries
        );

        Self {
            segments,
            partitioner,
            time,
            stats: Arc::new(StatsCollector::new()),
            eviction_listener: None,
        }
    }

    /// Registers the callback notified of capacity evictions.
    pub fn with_eviction_listener(mut self, listener: EvictionListener<K, V>) -> Self {
        self.eviction_listener = Some(listener);
        self
    }

    pub fn time_service(&self) -> &Arc<dyn TimeService> {
        &self.time
    }

    pub fn stats_collector(&self) -> &Arc<StatsCollector> {
        &self.stats
    }

    pub fn num_segments(&self) -> u32 {
        self.partitioner.num_segments()
    }

    pub fn segment_for_key(&self, key: &K) -> u32 {
        self.partitioner.segment_for(key)
    }

    fn segment(&self, key: &K) -> &Segment<K, V> {
        &self.segments[self.segment_for_key(key) as usize]
    }

    // == Get ==
    /// Retrieves a live entry and records the access.
    ///
    /// An entry found expired is removed and reported as absent.
    pub fn get(&self, key: &K) -> Option<CacheEntry<K, V>> {
        let now = self.time.time();
        let segment = self.segment(key);

        match segment.get(key, now) {
            Lookup::Hit(entry) => {
                self.stats.record_hit();
                Some(entry)
            }
            Lookup::Miss => {
                self.stats.record_miss();
                None
            }
            Lookup::Expired => {
                if segment.remove_if_expired(key, now).is_some() {
                    self.stats.record_expirations(1);
                }
                self.stats.record_miss();
                None
            }
        }
    }

    /// Reads a live entry without touching its access time or ordering.
    pub fn peek(&self, key: &K) -> Option<CacheEntry<K, V>> {
        self.segment(key).peek(key, self.time.time())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.segment(key).contains_key(key, self.time.time())
    }

    // == Put ==
    /// Inserts or replaces an entry, returning the live entry it replaced.
    pub fn put(&self, key: K, value: V, expiration: Expiration) -> Option<CacheEntry<K, V>> {
        let now = self.time.time();
        let outcome = self.segment(&key).put(key, value, expiration, now);
        self.stats.record_store();
        self.finish_write(outcome)
    }

    /// Inserts an entry keeping its own timestamps (preload, activation,
    /// state transfer).
    pub fn insert_entry(&self, entry: CacheEntry<K, V>) -> Option<CacheEntry<K, V>> {
        let now = self.time.time();
        let outcome = self.segment(&entry.key).insert_entry(entry, now);
        self.finish_write(outcome)
    }

    /// Inserts only when no live entry exists. Returns the entry already
    /// present, or None when `entry` was inserted.
    pub fn put_if_absent(&self, entry: CacheEntry<K, V>) -> Option<CacheEntry<K, V>> {
        let now = self.time.time();
        match self.segment(&entry.key).put_if_absent(entry, now) {
            Ok(outcome) => {
                self.finish_write(outcome);
                None
            }
            Err(existing) => Some(existing),
        }
    }

    fn finish_write(&self, outcome: PutOutcome<K, V>) -> Option<CacheEntry<K, V>> {
        if !outcome.evicted.is_empty() {
            self.stats.record_evictions(outcome.evicted.len());
            if let Some(listener) = &self.eviction_listener {
                for entry in &outcome.evicted {
                    listener(entry);
                }
            }
        }
        outcome.previous
    }

    // == Remove ==
    pub fn remove(&self, key: &K) -> Option<CacheEntry<K, V>> {
        let removed = self.segment(key).remove(key, self.time.time());
        if removed.is_some() {
            self.stats.record_removal();
        }
        removed
    }

    // == Clear ==
    /// Clears every segment, map and ordering together. Returns the number of
    /// entries dropped.
    pub fn clear(&self) -> usize {
        self.segments.iter().map(Segment::clear).sum()
    }

    // == Iteration ==
    /// Lazily iterates all entries, one segment snapshot at a time.
    ///
    /// Weakly consistent: writes racing with the iteration may or may not be
    /// observed, but nothing is yielded twice and the iteration always ends.
    pub fn iter(&self, include_expired: bool) -> ContainerIter<'_, K, V> {
        ContainerIter::new(self, (0..self.num_segments()).collect(), include_expired)
    }

    /// Iterates the live entries of the given segments only.
    pub fn iter_segments(&self, segments: &BTreeSet<u32>) -> ContainerIter<'_, K, V> {
        let ids = segments
            .iter()
            .copied()
            .filter(|&s| s < self.num_segments())
            .collect();
        ContainerIter::new(self, ids, false)
    }

    pub fn segment_size(&self, segment: u32) -> usize {
        self.segments
            .get(segment as usize)
            .map_or(0, |s| s.live_len(self.time.time()))
    }

    /// Drops every entry of the given segments. Returns the number removed.
    pub fn remove_segments(&self, segments: &BTreeSet<u32>) -> usize {
        let removed: usize = segments
            .iter()
            .filter_map(|&s| self.segments.get(s as usize))
            .map(Segment::clear)
            .sum();
        debug!("Dropped {} entries from segments {:?}", removed, segments);
        removed
    }

    // == Purge Expired ==
    /// Removes every expired entry; returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.time.time();
        let purged: usize = self
            .segments
            .iter()
            .map(|s| s.purge_expired(now).len())
            .sum();
        if purged > 0 {
            self.stats.record_expirations(purged);
        }
        purged
    }

    // == Size ==
    /// Number of live entries.
    pub fn size(&self) -> usize {
        let now = self.time.time();
        self.segments.iter().map(|s| s.live_len(now)).sum()
    }

    /// Entries held, including expired ones not yet purged.
    pub fn size_including_expired(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.size())
    }
}

// == Container Iterator ==
/// Lazy iterator over container entries.
pub struct ContainerIter<'a, K, V> {
    container: &'a DataContainer<K, V>,
    pending: std::vec::IntoIter<u32>,
    current: std::vec::IntoIter<CacheEntry<K, V>>,
    include_expired: bool,
}

impl<'a, K, V> ContainerIter<'a, K, V> {
    fn new(container: &'a DataContainer<K, V>, segments: Vec<u32>, include_expired: bool) -> Self {
        Self {
            container,
            pending: segments.into_iter(),
            current: Vec::new().into_iter(),
            include_expired,
        }
    }
}

impl<K, V> Iterator for ContainerIter<'_, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    type Item = CacheEntry<K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.current.next() {
                return Some(entry);
            }
            let segment = self.pending.next()?;
            let now = self.container.time.time();
            self.current = self.container.segments[segment as usize]
                .snapshot(self.include_expired, now)
                .into_iter();
        }
    }
}
