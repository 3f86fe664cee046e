//! Cache Statistics Module
//!
//! Tracks hits, misses, evictions, expirations and store traffic. Counters are
//! atomics so request threads never share a lock just to count.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Stats ==
/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Reads that found a live entry
    pub hits: u64,
    /// Reads that found nothing (absent or expired)
    pub misses: u64,
    /// Writes into the container
    pub stores: u64,
    /// Explicit removals of live entries
    pub removals: u64,
    /// Entries evicted by the ordering policy
    pub evictions: u64,
    /// Entries dropped because they expired
    pub expirations: u64,
    /// Entries loaded from the backing store on a miss
    pub store_loads: u64,
    /// Entries written to the backing store by passivation
    pub passivations: u64,
    /// Current number of entries held in memory
    pub total_entries: usize,
}

impl CacheStats {
    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// == Stats Collector ==
/// Shared, lock-free counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub struct StatsCollector {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    removals: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    store_loads: AtomicU64,
    passivations: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_removal(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_expirations(&self, count: usize) {
        self.expirations.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_store_load(&self) {
        self.store_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_passivations(&self, count: usize) {
        self.passivations.fetch_add(count as u64, Ordering::Relaxed);
    }

    // == Snapshot ==
    pub fn snapshot(&self, total_entries: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            store_loads: self.store_loads.load(Ordering::Relaxed),
            passivations: self.passivations.load(Ordering::Relaxed),
            total_entries,
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.stores,
            &self.removals,
            &self.evictions,
            &self.expirations,
            &self.store_loads,
            &self.passivations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = StatsCollector::new().snapshot(0);
        assert_eq!(stats, CacheStats::default());
    }

    #[test]
    fn test_hit_rate_no_requests() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let collector = StatsCollector::new();
        collector.record_hit();
        collector.record_miss();
        assert_eq!(collector.snapshot(0).hit_rate(), 0.5);
    }

    #[test]
    fn test_record_evictions_and_expirations() {
        let collector = StatsCollector::new();
        collector.record_evictions(2);
        collector.record_expirations(3);

        let stats = collector.snapshot(7);
        assert_eq!(stats.evictions, 2);
        assert_eq!(stats.expirations, 3);
        assert_eq!(stats.total_entries, 7);
    }

    #[test]
    fn test_reset() {
        let collector = StatsCollector::new();
        collector.record_hit();
        collector.record_store();
        collector.reset();
        assert_eq!(collector.snapshot(0), CacheStats::default());
    }

    #[test]
    fn test_stats_serialize() {
        let collector = StatsCollector::new();
        collector.record_hit();
        let json = serde_json::to_value(collector.snapshot(1)).unwrap();
        assert_eq!(json["hits"], 1);
        assert_eq!(json["total_entries"], 1);
    }
}
