//! Modification Module
//!
//! Units of work queued for the backing store, and the coalescing applied to a
//! drained batch before it is written.

use std::collections::HashSet;

use crate::persistence::MarshaledEntry;

// == Modification ==
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
    Store(MarshaledEntry),
    Remove(Vec<u8>),
    Clear,
}

impl Modification {
    /// Key touched by the modification; None for `Clear`.
    pub fn key(&self) -> Option<&[u8]> {
        match self {
            Modification::Store(entry) => Some(&entry.key),
            Modification::Remove(key) => Some(key),
            Modification::Clear => None,
        }
    }

    pub fn is_clear(&self) -> bool {
        matches!(self, Modification::Clear)
    }
}

// == Coalesce ==
/// Reduces a batch to the minimum set of writes with the same end state.
///
/// Everything before the last `Clear` is dropped (the clear wipes it anyway),
/// then only the last modification per key is kept. Kept modifications stay
/// in their original relative order, after the `Clear` if there was one.
pub(crate) fn coalesce(batch: Vec<Modification>) -> Vec<Modification> {
    let start = batch.iter().rposition(Modification::is_clear);

    let mut seen: HashSet<Vec<u8>> = HashSet::new();
    let mut kept: Vec<Modification> = Vec::with_capacity(batch.len());
    for modification in batch.into_iter().skip(start.unwrap_or(0)).rev() {
        match modification.key() {
            Some(key) => {
                if seen.insert(key.to_vec()) {
                    kept.push(modification);
                }
            }
            None => kept.push(modification),
        }
    }
    kept.reverse();
    kept
}
