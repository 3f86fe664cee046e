//! Consistent Hash Module
//!
//! Immutable mapping of every segment to an ordered owner list. Index 0 of an
//! owner list is the primary owner; the rest are backups. A new topology
//! always produces a new `ConsistentHash`; the old and new instances are
//! diffed to drive state transfer.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::Xxh64;

use crate::error::{CacheError, Result};

// == Node Address ==
/// Identity of a cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress(String);

impl NodeAddress {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeAddress {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Seed of the key hash. Changing it moves every key to a new segment.
const PARTITION_SEED: u64 = 0;

// == Key Partitioner ==
/// Maps keys to segments. Pure function of the key hash and segment count.
///
/// Keys are hashed with seeded xxHash64, whose output is fixed by its
/// published algorithm, so nodes built with different toolchains agree on
/// placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPartitioner {
    num_segments: u32,
}

impl KeyPartitioner {
    /// A segment count of zero is raised to one.
    pub fn new(num_segments: u32) -> Self {
        Self {
            num_segments: num_segments.max(1),
        }
    }

    pub fn num_segments(&self) -> u32 {
        self.num_segments
    }

    // == Segment For Key ==
    pub fn segment_for<Q: Hash + ?Sized>(&self, key: &Q) -> u32 {
        let mut hasher = Xxh64::new(PARTITION_SEED);
        key.hash(&mut hasher);
        let hash = hasher.finish();
        let spread = hash ^ (hash >> 32);

        let n = u64::from(self.num_segments);
        if self.num_segments.is_power_of_two() {
            (spread & (n - 1)) as u32
        } else {
            (spread % n) as u32
        }
    }
}

// == Consistent Hash ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistentHash {
    num_owners: usize,
    members: Vec<NodeAddress>,
    segment_owners: Vec<Vec<NodeAddress>>,
    partitioner: KeyPartitioner,
}

impl ConsistentHash {
    // == Constructor ==
    /// Builds a hash from explicit owner lists, validating the invariants.
    ///
    /// With a non-empty member list every segment needs at least one owner,
    /// every owner must be a member, and no segment may list a node twice.
    pub fn new(
        members: Vec<NodeAddress>,
        num_owners: usize,
        segment_owners: Vec<Vec<NodeAddress>>,
    ) -> Result<Self> {
        if segment_owners.is_empty() {
            return Err(CacheError::InvalidConfig(
                "a consistent hash needs at least one segment".to_string(),
            ));
        }
        if num_owners == 0 {
            return Err(CacheError::InvalidConfig("num_owners must be at least 1".to_string()));
        }

        let known: HashSet<&NodeAddress> = members.iter().collect();
        for (segment, owners) in segment_owners.iter().enumerate() {
            if !members.is_empty() && owners.is_empty() {
                return Err(CacheError::InvalidConfig(format!(
                    "segment {segment} has no owners"
                )));
            }
            let mut seen = HashSet::new();
            for owner in owners {
                if !known.contains(owner) {
                    return Err(CacheError::InvalidConfig(format!(
                        "segment {segment} owner {owner} is not a member"
                    )));
                }
                if !seen.insert(owner) {
                    return Err(CacheError::InvalidConfig(format!(
                        "segment {segment} lists owner {owner} twice"
                    )));
                }
            }
        }

        let partitioner = KeyPartitioner::new(segment_owners.len() as u32);
        Ok(Self {
            num_owners,
            members,
            segment_owners,
            partitioner,
        })
    }

    pub fn num_segments(&self) -> u32 {
        self.partitioner.num_segments()
    }

    /// Configured replication factor (may exceed the member count).
    pub fn num_owners(&self) -> usize {
        self.num_owners
    }

    pub fn members(&self) -> &[NodeAddress] {
        &self.members
    }

    pub fn partitioner(&self) -> KeyPartitioner {
        self.partitioner
    }

    pub fn segment_for_key<Q: Hash + ?Sized>(&self, key: &Q) -> u32 {
        self.partitioner.segment_for(key)
    }

    // == Owners ==
    /// Ordered owners of a segment; empty for an empty cluster or an
    /// out-of-range segment.
    pub fn owners_of(&self, segment: u32) -> &[NodeAddress] {
        self.segment_owners
            .get(segment as usize)
            .map(|owners| owners.as_slice())
            .unwrap_or(&[])
    }

    pub fn primary_owner(&self, segment: u32) -> Option<&NodeAddress> {
        self.owners_of(segment).first()
    }

    pub fn is_primary_owner(&self, node: &NodeAddress, segment: u32) -> bool {
        self.primary_owner(segment) == Some(node)
    }

    pub fn is_owner(&self, node: &NodeAddress, segment: u32) -> bool {
        self.owners_of(segment).contains(node)
    }

    pub fn all_owners(&self, segment: u32) -> BTreeSet<NodeAddress> {
        self.owners_of(segment).iter().cloned().collect()
    }

    /// Owners of the segment a key maps to.
    pub fn locate_owners<Q: Hash + ?Sized>(&self, key: &Q) -> &[NodeAddress] {
        self.owners_of(self.segment_for_key(key))
    }

    // == Segments Per Owner ==
    /// Every segment the node owns, as primary or backup.
    pub fn segments_for_owner(&self, node: &NodeAddress) -> BTreeSet<u32> {
        (0..self.num_segments())
            .filter(|&segment| self.is_owner(node, segment))
            .collect()
    }

    pub fn primary_segments_for_owner(&self, node: &NodeAddress) -> BTreeSet<u32> {
        (0..self.num_segments())
            .filter(|&segment| self.is_primary_owner(node, segment))
            .collect()
    }

    /// Number of primary segments per member, in member order.
    pub fn primary_counts(&self) -> Vec<(NodeAddress, usize)> {
        self.members
            .iter()
            .map(|m| (m.clone(), self.primary_segments_for_owner(m).len()))
            .collect()
    }

    // == Diff ==
    /// Computes, per node, the segments it gains and loses going from `old`
    /// to `new`. Nodes whose ownership is unchanged do not appear.
    pub fn diff(old: &ConsistentHash, new: &ConsistentHash) -> Result<TopologyDiff> {
        if old.num_segments() != new.num_segments() {
            return Err(CacheError::InvalidTopology {
                old: old.num_segments(),
                new: new.num_segments(),
            });
        }

        let mut diff = TopologyDiff::default();
        for segment in 0..new.num_segments() {
            let before = old.all_owners(segment);
            let after = new.all_owners(segment);
            for gained in after.difference(&before) {
                diff.segments_to_pull
                    .entry(gained.clone())
                    .or_default()
                    .insert(segment);
            }
            for lost in before.difference(&after) {
                diff.segments_to_retire
                    .entry(lost.clone())
                    .or_default()
                    .insert(segment);
            }
        }
        Ok(diff)
    }
}

// == Topology Diff ==
/// Per-node ownership changes between two hashes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyDiff {
    /// Segments each node newly owns and must receive
    pub segments_to_pull: BTreeMap<NodeAddress, BTreeSet<u32>>,
    /// Segments each node no longer owns and may drop after transfer
    pub segments_to_retire: BTreeMap<NodeAddress, BTreeSet<u32>>,
}

impl TopologyDiff {
    pub fn is_empty(&self) -> bool {
        self.segments_to_pull.is_empty() && self.segments_to_retire.is_empty()
    }

    pub fn pull_for(&self, node: &NodeAddress) -> BTreeSet<u32> {
        self.segments_to_pull.get(node).cloned().unwrap_or_default()
    }

    pub fn retire_for(&self, node: &NodeAddress) -> BTreeSet<u32> {
        self.segments_to_retire.get(node).cloned().unwrap_or_default()
    }

    /// Segments whose owner set changed.
    pub fn changed_segments(&self) -> BTreeSet<u32> {
        self.segments_to_pull
            .values()
            .chain(self.segments_to_retire.values())
            .flatten()
            .copied()
            .collect()
    }

    pub fn affected_nodes(&self) -> BTreeSet<NodeAddress> {
        self.segments_to_pull
            .keys()
            .chain(self.segments_to_retire.keys())
            .cloned()
            .collect()
    }
}
