//! Eviction Module
//!
//! Pluggable ordering policies deciding which entry a full segment sacrifices.
//!
//! Each segment owns its own policy instance, guarded by the segment's policy
//! lock, so no eviction decision ever needs a lock outside that segment. The
//! global bound is therefore approximate: every segment evicts independently
//! against its share of the configured maximum.

mod lirs;
mod list;
mod lru;

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

pub use lirs::LirsPolicy;
pub use lru::LruPolicy;

// == Eviction Policy Trait ==
/// Secondary ordering structure kept beside a segment's hash index.
///
/// Every resident key has exactly one node; removing the key removes the node.
pub trait EvictionPolicy<K>: Send + fmt::Debug {
    /// A new key became resident.
    fn on_insert(&mut self, key: &K);

    /// A resident key was read or overwritten.
    fn on_access(&mut self, key: &K);

    /// A key was removed explicitly (remove, expiration, segment drop).
    fn on_remove(&mut self, key: &K);

    /// A key chosen by [`select_victim`](Self::select_victim) was evicted.
    fn on_evict(&mut self, key: &K) {
        self.on_remove(key);
    }

    /// Proposes the next victim, never returning `excluding`.
    fn select_victim(&mut self, excluding: &K) -> Option<K>;

    fn clear(&mut self);

    /// Number of resident keys tracked.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// == No Eviction ==
/// Unbounded segments: nothing is tracked, nothing is ever evicted.
#[derive(Debug, Default)]
pub struct NoEviction;

impl<K> EvictionPolicy<K> for NoEviction {
    fn on_insert(&mut self, _key: &K) {}
    fn on_access(&mut self, _key: &K) {}
    fn on_remove(&mut self, _key: &K) {}

    fn select_victim(&mut self, _excluding: &K) -> Option<K> {
        None
    }

    fn clear(&mut self) {}

    fn len(&self) -> usize {
        0
    }
}

// == Eviction Strategy ==
/// Configured ordering algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvictionStrategy {
    #[default]
    None,
    Lru,
    Lirs,
}

impl EvictionStrategy {
    /// Builds a policy for one segment holding at most `capacity` entries.
    pub fn build<K>(&self, capacity: usize) -> Box<dyn EvictionPolicy<K>>
    where
        K: Hash + Eq + Clone + Send + fmt::Debug + 'static,
    {
        match self {
            EvictionStrategy::None => Box::new(NoEviction),
            EvictionStrategy::Lru => Box::new(LruPolicy::new()),
            EvictionStrategy::Lirs => Box::new(LirsPolicy::new(capacity)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, EvictionStrategy::None)
    }
}

impl FromStr for EvictionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(EvictionStrategy::None),
            "LRU" => Ok(EvictionStrategy::Lru),
            "LIRS" => Ok(EvictionStrategy::Lirs),
            other => Err(format!("unknown eviction strategy '{other}'")),
        }
    }
}

impl fmt::Display for EvictionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvictionStrategy::None => "NONE",
            EvictionStrategy::Lru => "LRU",
            EvictionStrategy::Lirs => "LIRS",
        };
        f.write_str(name)
    }
}

// == Capacity Split ==
/// Splits a global bound across segments; every segment gets at least one slot.
pub fn distribute_capacity(total: usize, segments: usize) -> Vec<usize> {
    let segments = segments.max(1);
    let base = total / segments;
    let rem = total % segments;
    (0..segments)
        .map(|i| (base + usize::from(i < rem)).max(1))
        .collect()
}
