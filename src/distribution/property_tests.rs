//! Property-Based Tests for Distribution Module
//!
//! Uses proptest to verify ownership and rebalance properties.

use proptest::prelude::*;
use std::collections::BTreeSet;

use crate::distribution::{ConsistentHash, ConsistentHashFactory, KeyPartitioner, NodeAddress, RebalancePlan};

// == Strategies ==
fn members_strategy(max: usize) -> impl Strategy<Value = Vec<NodeAddress>> {
    prop::collection::btree_set("[a-z]{1,6}", 1..max)
        .prop_map(|names| names.into_iter().map(NodeAddress::new).collect())
}

/// A starting member list and a later one that keeps some, drops some and adds some.
fn membership_change() -> impl Strategy<Value = (Vec<NodeAddress>, Vec<NodeAddress>)> {
    (members_strategy(6), members_strategy(6))
}

fn assert_valid(ch: &ConsistentHash, members: &[NodeAddress], num_owners: usize) -> Result<(), TestCaseError> {
    let expected_owners = num_owners.min(members.len());
    for segment in 0..ch.num_segments() {
        let owners = ch.owners_of(segment);
        prop_assert_eq!(owners.len(), expected_owners, "segment {} owner count", segment);
        let distinct: BTreeSet<&NodeAddress> = owners.iter().collect();
        prop_assert_eq!(distinct.len(), owners.len(), "segment {} repeats an owner", segment);
        prop_assert!(owners.iter().all(|o| members.contains(o)));
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // **Feature: consistent-hash, Property 1: Hash Determinism**
    // *For any* key and segment count, the segment SHALL be the same on every
    // call and on every partitioner built with the same segment count.
    #[test]
    fn prop_hash_determinism(key in ".{0,32}", segments in 1u32..1024) {
        let a = KeyPartitioner::new(segments);
        let b = KeyPartitioner::new(segments);
        let segment = a.segment_for(&key);

        prop_assert!(segment < segments);
        prop_assert_eq!(segment, a.segment_for(&key));
        prop_assert_eq!(segment, b.segment_for(&key));
    }

    // **Feature: consistent-hash, Property 2: Balanced Creation**
    // *For any* member list, every segment SHALL get min(num_owners, members)
    // distinct owners and primary ownership SHALL differ by at most one.
    #[test]
    fn prop_create_is_valid_and_balanced(
        members in members_strategy(8),
        num_owners in 1usize..4,
        segments in 1u32..64
    ) {
        let ch = ConsistentHashFactory::create(&members, num_owners, segments).unwrap();
        assert_valid(&ch, &members, num_owners)?;

        let counts: Vec<usize> = ch.primary_counts().into_iter().map(|(_, c)| c).collect();
        let max = counts.iter().copied().max().unwrap_or(0);
        let min = counts.iter().copied().min().unwrap_or(0);
        prop_assert!(max - min <= 1, "primary counts {:?}", counts);

        let again = ConsistentHashFactory::create(&members, num_owners, segments).unwrap();
        prop_assert_eq!(ch, again);
    }

    // **Feature: consistent-hash, Property 3: Diff Completeness**
    // *For any* two hashes, applying the diff to the old owner sets SHALL
    // yield exactly the new owner sets.
    #[test]
    fn prop_diff_completeness(
        (before, after) in membership_change(),
        num_owners in 1usize..4,
        segments in 1u32..32
    ) {
        let old = ConsistentHashFactory::create(&before, num_owners, segments).unwrap();
        let new = ConsistentHashFactory::rebalance(&old, &after).unwrap();
        assert_valid(&new, &after, num_owners)?;

        let diff = ConsistentHash::diff(&old, &new).unwrap();
        for segment in 0..segments {
            let mut owners = old.all_owners(segment);
            for (node, gained) in &diff.segments_to_pull {
                if gained.contains(&segment) {
                    owners.insert(node.clone());
                }
            }
            for (node, lost) in &diff.segments_to_retire {
                if lost.contains(&segment) {
                    owners.remove(node);
                }
            }
            prop_assert_eq!(owners, new.all_owners(segment), "segment {}", segment);
        }
    }

    // **Feature: consistent-hash, Property 4: Rebalance Stability**
    // *For any* balanced hash, rebalancing onto the same member list SHALL
    // change no owner.
    #[test]
    fn prop_rebalance_is_stable(members in members_strategy(6), num_owners in 1usize..3, segments in 1u32..32) {
        let ch = ConsistentHashFactory::create(&members, num_owners, segments).unwrap();
        let again = ConsistentHashFactory::rebalance(&ch, &members).unwrap();
        prop_assert_eq!(&again, &ch);

        let diff = ConsistentHash::diff(&ch, &again).unwrap();
        prop_assert!(diff.is_empty());
    }

    // **Feature: rebalance, Property 5: Every Pull Has One Pusher**
    // *For any* membership change, each segment a node must pull from a
    // surviving owner SHALL appear in exactly that owner's outbound plan.
    #[test]
    fn prop_pulls_match_pushes(
        (before, after) in membership_change(),
        num_owners in 1usize..4,
        segments in 1u32..32
    ) {
        let old = ConsistentHashFactory::create(&before, num_owners, segments).unwrap();
        let new = ConsistentHashFactory::rebalance(&old, &after).unwrap();

        let mut everyone: BTreeSet<NodeAddress> = before.iter().cloned().collect();
        everyone.extend(after.iter().cloned());
        let plans: Vec<RebalancePlan> = everyone
            .iter()
            .map(|node| RebalancePlan::compute(node, &old, &new, 1).unwrap())
            .collect();

        for plan in &plans {
            for transfer in &plan.inbound {
                let pushers: Vec<&NodeAddress> = plans
                    .iter()
                    .filter(|p| p.outbound.iter().any(|o| o.segment == transfer.segment && o.destinations.contains(&plan.local)))
                    .map(|p| &p.local)
                    .collect();
                match &transfer.source {
                    Some(source) => prop_assert_eq!(pushers, vec![source]),
                    None => prop_assert!(pushers.is_empty()),
                }
            }
        }
    }
}
