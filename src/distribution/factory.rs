//! Consistent Hash Factory
//!
//! Builds and rebalances consistent hashes. Both operations are pure functions
//! of their inputs (member order, owner count, segment count, and for a
//! rebalance the previous hash), so every node computes the same hash without
//! talking to anyone.
//!
//! Balancing works on member indices:
//! 1. keep surviving owners, drop departed ones, cap lists at the owner count
//! 2. give ownerless segments a primary from the node furthest below its share
//! 3. move primaries off over-loaded nodes, preferring a promotion of an
//!    existing backup (no data moves) over adding a new owner
//! 4. fill missing backups, then trim lists that grew past the owner count
//! 5. hand backups from over-loaded nodes to under-loaded ones
//!
//! Ties always go to the earlier member in the member list.

use std::collections::HashMap;

use crate::distribution::{ConsistentHash, NodeAddress};
use crate::error::{CacheError, Result};

// == Consistent Hash Factory ==
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsistentHashFactory;

impl ConsistentHashFactory {
    // == Create ==
    /// Builds a balanced hash for a fresh member list.
    pub fn create(members: &[NodeAddress], num_owners: usize, num_segments: u32) -> Result<ConsistentHash> {
        if num_segments == 0 {
            return Err(CacheError::InvalidConfig("num_segments must be at least 1".to_string()));
        }
        let members = dedup(members);
        let owners = vec![Vec::new(); num_segments as usize];
        build(members, num_owners, owners)
    }

    // == Rebalance ==
    /// Builds the hash for a new member list starting from `old`, keeping as
    /// many existing owners as balance allows.
    pub fn rebalance(old: &ConsistentHash, members: &[NodeAddress]) -> Result<ConsistentHash> {
        let members = dedup(members);
        let owners = (0..old.num_segments())
            .map(|segment| old.owners_of(segment).to_vec())
            .collect();
        build(members, old.num_owners(), owners)
    }
}

fn dedup(members: &[NodeAddress]) -> Vec<NodeAddress> {
    let mut out: Vec<NodeAddress> = Vec::with_capacity(members.len());
    for member in members {
        if !out.contains(member) {
            out.push(member.clone());
        }
    }
    out
}

fn build(members: Vec<NodeAddress>, num_owners: usize, owners: Vec<Vec<NodeAddress>>) -> Result<ConsistentHash> {
    if num_owners == 0 {
        return Err(CacheError::InvalidConfig("num_owners must be at least 1".to_string()));
    }
    if members.is_empty() {
        let empty = vec![Vec::new(); owners.len()];
        return ConsistentHash::new(members, num_owners, empty);
    }

    let index: HashMap<&NodeAddress, usize> = members.iter().enumerate().map(|(i, m)| (m, i)).collect();
    let start: Vec<Vec<usize>> = owners
        .iter()
        .map(|list| list.iter().filter_map(|owner| index.get(owner).copied()).collect())
        .collect();

    let mut balancer = Balancer::new(members.len(), num_owners, start);
    balancer.run();

    let segment_owners = balancer
        .owners
        .into_iter()
        .map(|list| list.into_iter().map(|i| members[i].clone()).collect())
        .collect();
    ConsistentHash::new(members, num_owners, segment_owners)
}

// == Balancer ==
struct Balancer {
    owners: Vec<Vec<usize>>,
    actual_owners: usize,
    primary_target: Vec<usize>,
    owned_target: Vec<usize>,
    primary_count: Vec<usize>,
    owned_count: Vec<usize>,
}

impl Balancer {
    fn new(num_members: usize, num_owners: usize, owners: Vec<Vec<usize>>) -> Self {
        let num_segments = owners.len();
        let actual_owners = num_owners.min(num_members);
        let share = |total: usize| -> Vec<usize> {
            (0..num_members)
                .map(|i| total / num_members + usize::from(i < total % num_members))
                .collect()
        };
        Self {
            owners,
            actual_owners,
            primary_target: share(num_segments),
            owned_target: share(num_segments * actual_owners),
            primary_count: vec![0; num_members],
            owned_count: vec![0; num_members],
        }
    }

    fn run(&mut self) {
        for list in &mut self.owners {
            list.truncate(self.actual_owners);
        }
        self.recount();
        self.assign_missing_primaries();
        self.balance_primaries();
        self.fill_backups();
        self.trim_backups();
        // each swap strictly lowers the total imbalance, so this terminates
        while self.balance_backups() {}
    }

    fn recount(&mut self) {
        self.primary_count.iter_mut().for_each(|c| *c = 0);
        self.owned_count.iter_mut().for_each(|c| *c = 0);
        for list in &self.owners {
            if let Some(&primary) = list.first() {
                self.primary_count[primary] += 1;
            }
            for &owner in list {
                self.owned_count[owner] += 1;
            }
        }
    }

    /// Node furthest below its target, skipping `exclude`; ties go to the lowest index.
    fn most_needy(count: &[usize], target: &[usize], exclude: &[usize], strictly_under: bool) -> Option<usize> {
        (0..count.len())
            .filter(|i| !exclude.contains(i))
            .filter(|&i| !strictly_under || count[i] < target[i])
            .max_by(|&a, &b| {
                let need_a = target[a] as isize - count[a] as isize;
                let need_b = target[b] as isize - count[b] as isize;
                need_a.cmp(&need_b).then(b.cmp(&a))
            })
    }

    fn assign_missing_primaries(&mut self) {
        for segment in 0..self.owners.len() {
            if !self.owners[segment].is_empty() {
                continue;
            }
            if let Some(node) = Self::most_needy(&self.primary_count, &self.primary_target, &[], false) {
                self.owners[segment].push(node);
                self.primary_count[node] += 1;
                self.owned_count[node] += 1;
            }
        }
    }

    fn balance_primaries(&mut self) {
        // promote an under-loaded backup first: no data has to move
        for segment in 0..self.owners.len() {
            let primary = self.owners[segment][0];
            if self.primary_count[primary] <= self.primary_target[primary] {
                continue;
            }
            let promoted = self.owners[segment][1..]
                .iter()
                .position(|&b| self.primary_count[b] < self.primary_target[b]);
            if let Some(pos) = promoted {
                self.owners[segment].swap(0, pos + 1);
                let new_primary = self.owners[segment][0];
                self.primary_count[primary] -= 1;
                self.primary_count[new_primary] += 1;
            }
        }

        for segment in 0..self.owners.len() {
            let primary = self.owners[segment][0];
            if self.primary_count[primary] <= self.primary_target[primary] {
                continue;
            }
            let exclude = self.owners[segment].clone();
            if let Some(node) = Self::most_needy(&self.primary_count, &self.primary_target, &exclude, true) {
                self.owners[segment].insert(0, node);
                self.primary_count[primary] -= 1;
                self.primary_count[node] += 1;
                self.owned_count[node] += 1;
            }
        }
    }

    fn fill_backups(&mut self) {
        for segment in 0..self.owners.len() {
            while self.owners[segment].len() < self.actual_owners {
                let exclude = self.owners[segment].clone();
                match Self::most_needy(&self.owned_count, &self.owned_target, &exclude, false) {
                    Some(node) => {
                        self.owners[segment].push(node);
                        self.owned_count[node] += 1;
                    }
                    None => break,
                }
            }
        }
    }

    fn trim_backups(&mut self) {
        for segment in 0..self.owners.len() {
            while self.owners[segment].len() > self.actual_owners {
                // most surplus backup goes; ties drop the later position
                let list = &self.owners[segment];
                let Some(pos) = (1..list.len()).max_by(|&a, &b| {
                    let surplus = |i: usize| self.owned_count[list[i]] as isize - self.owned_target[list[i]] as isize;
                    surplus(a).cmp(&surplus(b)).then(a.cmp(&b))
                }) else {
                    break;
                };
                let removed = self.owners[segment].remove(pos);
                self.owned_count[removed] -= 1;
            }
        }
    }

    fn balance_backups(&mut self) -> bool {
        let mut changed = false;
        for segment in 0..self.owners.len() {
            for pos in 1..self.owners[segment].len() {
                let backup = self.owners[segment][pos];
                if self.owned_count[backup] <= self.owned_target[backup] {
                    continue;
                }
                let exclude = self.owners[segment].clone();
                if let Some(node) = Self::most_needy(&self.owned_count, &self.owned_target, &exclude, true) {
                    self.owners[segment][pos] = node;
                    self.owned_count[backup] -= 1;
                    self.owned_count[node] += 1;
                    changed = true;
                }
            }
        }
        changed
    }
}
