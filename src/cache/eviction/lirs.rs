//! LIRS Policy Module
//!
//! Low Inter-reference Recency Set ordering. Keys with a short reuse distance
//! (LIR) are protected; victims come from a small queue of resident HIR keys.
//! The recency stack also remembers recently evicted (non-resident) keys so a
//! quick re-insert can be promoted straight to LIR.
//!
//! Stack invariant: after pruning, the bottom of the stack is always a LIR key.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use super::list::LinkedSlab;
use super::EvictionPolicy;

/// Share of a segment's capacity reserved for resident HIR keys (percent).
const HIR_PERCENT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Lir,
    HirResident,
    HirNonResident,
}

#[derive(Debug)]
struct Meta {
    status: Status,
    /// Node in the recency stack, if present
    stack: Option<usize>,
    /// Node in the resident HIR queue, if present
    queue: Option<usize>,
}

// == LIRS Policy ==
#[derive(Debug)]
pub struct LirsPolicy<K> {
    stack: LinkedSlab<K>,
    queue: LinkedSlab<K>,
    meta: HashMap<K, Meta>,
    lir_capacity: usize,
    lir_count: usize,
    resident: usize,
    non_resident: usize,
    max_non_resident: usize,
}

impl<K: Hash + Eq + Clone> LirsPolicy<K> {
    /// Creates a policy for a segment holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let hir = (capacity * HIR_PERCENT / 100).max(1);
        let lir_capacity = capacity.saturating_sub(hir).max(1);
        Self {
            stack: LinkedSlab::new(),
            queue: LinkedSlab::new(),
            meta: HashMap::new(),
            lir_capacity,
            lir_count: 0,
            resident: 0,
            non_resident: 0,
            max_non_resident: capacity,
        }
    }

    pub fn is_lir(&self, key: &K) -> bool {
        self.status(key) == Some(Status::Lir)
    }

    pub fn is_resident_hir(&self, key: &K) -> bool {
        self.status(key) == Some(Status::HirResident)
    }

    /// Number of evicted keys still remembered in the stack.
    pub fn non_resident_len(&self) -> usize {
        self.non_resident
    }

    fn status(&self, key: &K) -> Option<Status> {
        self.meta.get(key).map(|m| m.status)
    }

    fn push_stack(&mut self, key: &K) {
        let idx = self.stack.push_front(key.clone());
        if let Some(meta) = self.meta.get_mut(key) {
            meta.stack = Some(idx);
        }
    }

    fn push_queue(&mut self, key: &K) {
        let idx = self.queue.push_front(key.clone());
        if let Some(meta) = self.meta.get_mut(key) {
            meta.queue = Some(idx);
        }
    }

    // == Stack Pruning ==
    /// Pops HIR keys off the stack bottom until a LIR key sits there.
    fn prune(&mut self) {
        while let Some(bottom) = self.stack.back() {
            let Some(key) = self.stack.key(bottom).cloned() else {
                break;
            };
            let status = match self.meta.get(&key) {
                Some(meta) => meta.status,
                None => {
                    self.stack.unlink(bottom);
                    continue;
                }
            };
            match status {
                Status::Lir => break,
                Status::HirResident => {
                    if let Some(meta) = self.meta.get_mut(&key) {
                        meta.stack = None;
                    }
                    self.stack.unlink(bottom);
                }
                Status::HirNonResident => {
                    self.stack.unlink(bottom);
                    self.meta.remove(&key);
                    self.non_resident -= 1;
                }
            }
        }
    }

    // == Demotion ==
    /// Moves the bottom LIR key into the resident HIR queue.
    fn demote_bottom(&mut self) {
        let Some(bottom) = self.stack.back() else {
            return;
        };
        let Some(key) = self.stack.unlink(bottom) else {
            return;
        };
        if let Some(meta) = self.meta.get_mut(&key) {
            meta.status = Status::HirResident;
            meta.stack = None;
            self.lir_count -= 1;
        }
        self.push_queue(&key);
        self.prune();
    }

    fn promote(&mut self, key: &K) {
        let (stack, queue) = match self.meta.get_mut(key) {
            Some(meta) => {
                meta.status = Status::Lir;
                (meta.stack.take(), meta.queue.take())
            }
            None => return,
        };
        if let Some(idx) = queue {
            self.queue.unlink(idx);
        }
        if let Some(idx) = stack {
            self.stack.unlink(idx);
        }
        self.lir_count += 1;
        self.push_stack(key);
        if self.lir_count > self.lir_capacity {
            self.demote_bottom();
        }
    }

    /// Forgets the oldest non-resident keys once history exceeds its bound.
    fn trim_history(&mut self) {
        if self.non_resident <= self.max_non_resident {
            return;
        }
        let excess: Vec<(usize, K)> = self
            .stack
            .iter_from_back()
            .filter(|(_, key)| self.status(key) == Some(Status::HirNonResident))
            .take(self.non_resident - self.max_non_resident)
            .map(|(idx, key)| (idx, key.clone()))
            .collect();
        for (idx, key) in excess {
            self.stack.unlink(idx);
            self.meta.remove(&key);
            self.non_resident -= 1;
        }
    }

    fn forget(&mut self, key: &K) -> Option<Meta> {
        let meta = self.meta.remove(key)?;
        if let Some(idx) = meta.stack {
            self.stack.unlink(idx);
        }
        if let Some(idx) = meta.queue {
            self.queue.unlink(idx);
        }
        match meta.status {
            Status::Lir => {
                self.lir_count -= 1;
                self.resident -= 1;
            }
            Status::HirResident => self.resident -= 1,
            Status::HirNonResident => self.non_resident -= 1,
        }
        Some(meta)
    }
}

impl<K> EvictionPolicy<K> for LirsPolicy<K>
where
    K: Hash + Eq + Clone + Send + fmt::Debug,
{
    fn on_insert(&mut self, key: &K) {
        match self.status(key) {
            Some(Status::HirNonResident) => {
                // re-referenced within the stack's recency window
                self.non_resident -= 1;
                self.resident += 1;
                self.promote(key);
                self.prune();
            }
            Some(_) => self.on_access(key),
            None if self.lir_count < self.lir_capacity => {
                self.meta.insert(
                    key.clone(),
                    Meta {
                        status: Status::Lir,
                        stack: None,
                        queue: None,
                    },
                );
                self.lir_count += 1;
                self.resident += 1;
                self.push_stack(key);
            }
            None => {
                self.meta.insert(
                    key.clone(),
                    Meta {
                        status: Status::HirResident,
                        stack: None,
                        queue: None,
                    },
                );
                self.resident += 1;
                self.push_stack(key);
                self.push_queue(key);
            }
        }
    }

    fn on_access(&mut self, key: &K) {
        let Some((status, stack, queue)) = self.meta.get(key).map(|m| (m.status, m.stack, m.queue))
        else {
            return;
        };
        match (status, stack) {
            (Status::Lir, Some(idx)) => {
                let was_bottom = self.stack.back() == Some(idx);
                self.stack.move_to_front(idx);
                if was_bottom {
                    self.prune();
                }
            }
            (Status::HirResident, Some(_)) => {
                self.promote(key);
                self.prune();
            }
            (Status::HirResident, None) => {
                self.push_stack(key);
                if let Some(idx) = queue {
                    self.queue.move_to_front(idx);
                }
            }
            _ => {}
        }
    }

    fn on_remove(&mut self, key: &K) {
        if let Some(meta) = self.forget(key) {
            if meta.status == Status::Lir {
                self.prune();
            }
        }
    }

    fn on_evict(&mut self, key: &K) {
        let Some(meta) = self.meta.get_mut(key) else {
            return;
        };
        if meta.status == Status::HirResident && meta.stack.is_some() {
            // keep the stack node as history
            if let Some(idx) = meta.queue.take() {
                self.queue.unlink(idx);
            }
            meta.status = Status::HirNonResident;
            self.resident -= 1;
            self.non_resident += 1;
            self.trim_history();
        } else {
            self.on_remove(key);
        }
    }

    fn select_victim(&mut self, excluding: &K) -> Option<K> {
        let from_queue = self
            .queue
            .iter_from_back()
            .map(|(_, key)| key)
            .find(|key| *key != excluding)
            .cloned();
        if from_queue.is_some() {
            return from_queue;
        }
        // tiny segments can hold only LIR keys
        self.stack
            .iter_from_back()
            .map(|(_, key)| key)
            .find(|key| *key != excluding && self.status(key) == Some(Status::Lir))
            .cloned()
    }

    fn clear(&mut self) {
        self.stack.clear();
        self.queue.clear();
        self.meta.clear();
        self.lir_count = 0;
        self.resident = 0;
        self.non_resident = 0;
    }

    fn len(&self) -> usize {
        self.resident
    }
}
