//! Cache Module
//!
//! Provides the segmented in-memory container with lifespan/max-idle
//! expiration and pluggable eviction ordering.

mod container;
mod entry;
mod eviction;
mod segment;
mod stats;
mod time;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use container::{ContainerConfig, ContainerIter, DataContainer, EvictionListener};
pub use entry::{CacheEntry, EntryKind, Expiration};
pub use eviction::{
    distribute_capacity, EvictionPolicy, EvictionStrategy, LirsPolicy, LruPolicy, NoEviction,
};
pub use stats::{CacheStats, StatsCollector};
pub use time::{ControlledTimeService, DefaultTimeService, TimeService, MONOTONIC_ORIGIN_NANOS};
