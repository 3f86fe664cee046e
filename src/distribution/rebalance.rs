//! Rebalance Plan Module
//!
//! Turns a topology diff into the concrete transfers one node has to take part
//! in. The transfers themselves belong to the transport layer; this module only
//! decides who sends which segment to whom.
//!
//! Sender and receiver agree on the source without talking: the source of a
//! segment is its first old owner that is still a member (old primary first),
//! and both sides compute it from the same pair of hashes.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::distribution::{ConsistentHash, NodeAddress, TopologyDiff};
use crate::error::Result;

// == Transfers ==
/// A segment the local node must receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundTransfer {
    pub segment: u32,
    /// None when every previous owner left: the segment starts empty
    pub source: Option<NodeAddress>,
}

/// A segment the local node must send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundTransfer {
    pub segment: u32,
    pub destinations: Vec<NodeAddress>,
}

// == Rebalance Plan ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalancePlan {
    pub topology_id: u64,
    pub local: NodeAddress,
    pub inbound: Vec<InboundTransfer>,
    pub outbound: Vec<OutboundTransfer>,
    /// Segments the local node no longer owns; dropped once transfer is confirmed
    pub retired: BTreeSet<u32>,
    pub diff: TopologyDiff,
}

impl RebalancePlan {
    // == Compute ==
    pub fn compute(
        local: &NodeAddress,
        old: &ConsistentHash,
        new: &ConsistentHash,
        topology_id: u64,
    ) -> Result<Self> {
        let diff = ConsistentHash::diff(old, new)?;

        let inbound = diff
            .pull_for(local)
            .into_iter()
            .map(|segment| InboundTransfer {
                segment,
                source: transfer_source(old, new, segment, local),
            })
            .collect();

        let mut outbound: BTreeMap<u32, Vec<NodeAddress>> = BTreeMap::new();
        for (node, segments) in &diff.segments_to_pull {
            if node == local {
                continue;
            }
            for &segment in segments {
                if transfer_source(old, new, segment, node).as_ref() == Some(local) {
                    outbound.entry(segment).or_default().push(node.clone());
                }
            }
        }
        let outbound = outbound
            .into_iter()
            .map(|(segment, destinations)| OutboundTransfer {
                segment,
                destinations,
            })
            .collect();

        Ok(Self {
            topology_id,
            local: local.clone(),
            inbound,
            outbound,
            retired: diff.retire_for(local),
            diff,
        })
    }

    pub fn is_noop(&self) -> bool {
        self.inbound.is_empty() && self.outbound.is_empty() && self.retired.is_empty()
    }

    /// Inbound segments nobody can provide.
    pub fn lost_segments(&self) -> BTreeSet<u32> {
        self.inbound
            .iter()
            .filter(|t| t.source.is_none())
            .map(|t| t.segment)
            .collect()
    }
}

/// First old owner still present in the new member list, other than the receiver.
fn transfer_source(
    old: &ConsistentHash,
    new: &ConsistentHash,
    segment: u32,
    receiver: &NodeAddress,
) -> Option<NodeAddress> {
    old.owners_of(segment)
        .iter()
        .find(|owner| *owner != receiver && new.members().contains(owner))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::ConsistentHashFactory;

    fn nodes(names: &[&str]) -> Vec<NodeAddress> {
        names.iter().map(|n| NodeAddress::new(*n)).collect()
    }

    #[test]
    fn test_joiner_pulls_and_old_owners_push() {
        let old = ConsistentHashFactory::create(&nodes(&["A", "B"]), 2, 4).unwrap();
        let new = ConsistentHashFactory::rebalance(&old, &nodes(&["A", "B", "C"])).unwrap();
        let c = NodeAddress::new("C");

        let joiner = RebalancePlan::compute(&c, &old, &new, 2).unwrap();
        assert!(!joiner.inbound.is_empty());
        assert!(joiner.outbound.is_empty());
        assert!(joiner.lost_segments().is_empty());

        // every inbound segment is pushed by exactly its chosen source
        for transfer in &joiner.inbound {
            let source = transfer.source.clone().unwrap();
            let sender = RebalancePlan::compute(&source, &old, &new, 2).unwrap();
            let push = sender
                .outbound
                .iter()
                .find(|o| o.segment == transfer.segment)
                .expect("source should push the segment");
            assert!(push.destinations.contains(&c));
        }
    }

    #[test]
    fn test_unchanged_topology_is_noop() {
        let ch = ConsistentHashFactory::create(&nodes(&["A", "B"]), 1, 8).unwrap();
        let plan = RebalancePlan::compute(&NodeAddress::new("A"), &ch, &ch, 1).unwrap();
        assert!(plan.is_noop());
        assert!(plan.diff.is_empty());
    }

    #[test]
    fn test_single_owner_crash_loses_segments() {
        let old = ConsistentHashFactory::create(&nodes(&["A", "B"]), 1, 4).unwrap();
        let new = ConsistentHashFactory::rebalance(&old, &nodes(&["A"])).unwrap();
        let a = NodeAddress::new("A");

        let plan = RebalancePlan::compute(&a, &old, &new, 2).unwrap();
        assert_eq!(plan.lost_segments(), old.primary_segments_for_owner(&NodeAddress::new("B")));
        assert!(plan.retired.is_empty());
    }

    #[test]
    fn test_leaver_retires_everything() {
        let old = ConsistentHashFactory::create(&nodes(&["A", "B"]), 1, 4).unwrap();
        let new = ConsistentHashFactory::rebalance(&old, &nodes(&["A"])).unwrap();
        let b = NodeAddress::new("B");

        let plan = RebalancePlan::compute(&b, &old, &new, 2).unwrap();
        assert_eq!(plan.retired, old.segments_for_owner(&b));
        assert!(plan.outbound.is_empty(), "a departed node is never a source");
    }
}
