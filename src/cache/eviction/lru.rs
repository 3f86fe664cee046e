//! LRU Policy Module
//!
//! Least Recently Used ordering over an intrusive list.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use super::list::LinkedSlab;
use super::EvictionPolicy;

// == LRU Policy ==
/// Tracks access order for LRU eviction.
///
/// - Front = most recently used
/// - Back = least recently used
///
/// The index maps each key to its list node, so touch and removal are O(1)
/// instead of scanning the order.
#[derive(Debug)]
pub struct LruPolicy<K> {
    order: LinkedSlab<K>,
    index: HashMap<K, usize>,
}

impl<K: Hash + Eq + Clone> LruPolicy<K> {
    pub fn new() -> Self {
        Self {
            order: LinkedSlab::new(),
            index: HashMap::new(),
        }
    }

    // == Touch ==
    /// Marks a key as recently used, linking it if it is new.
    pub fn touch(&mut self, key: &K) {
        match self.index.get(key) {
            Some(&idx) => self.order.move_to_front(idx),
            None => {
                let idx = self.order.push_front(key.clone());
                self.index.insert(key.clone(), idx);
            }
        }
    }

    // == Remove ==
    pub fn remove(&mut self, key: &K) {
        if let Some(idx) = self.index.remove(key) {
            self.order.unlink(idx);
        }
    }

    // == Peek Oldest ==
    pub fn peek_oldest(&self) -> Option<&K> {
        self.order.back().and_then(|idx| self.order.key(idx))
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }
}

impl<K: Hash + Eq + Clone> Default for LruPolicy<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> EvictionPolicy<K> for LruPolicy<K>
where
    K: Hash + Eq + Clone + Send + fmt::Debug,
{
    fn on_insert(&mut self, key: &K) {
        self.touch(key);
    }

    fn on_access(&mut self, key: &K) {
        // reads racing a removal must not resurrect the node
        if let Some(&idx) = self.index.get(key) {
            self.order.move_to_front(idx);
        }
    }

    fn on_remove(&mut self, key: &K) {
        self.remove(key);
    }

    fn select_victim(&mut self, excluding: &K) -> Option<K> {
        self.order
            .iter_from_back()
            .map(|(_, key)| key)
            .find(|key| *key != excluding)
            .cloned()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.index.clear();
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}
