//! In-memory backing store, used by tests and as a stand-in for a real store.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::StoreResult;
use crate::persistence::{BackingStore, MarshaledEntry, RawEntries};

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<Vec<u8>, MarshaledEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BackingStore for MemoryStore {
    fn write(&self, entry: &MarshaledEntry) -> StoreResult<()> {
        self.records.lock().insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.records.lock().remove(key).is_some())
    }

    fn clear(&self) -> StoreResult<()> {
        self.records.lock().clear();
        Ok(())
    }

    fn load(&self, key: &[u8]) -> StoreResult<Option<MarshaledEntry>> {
        Ok(self.records.lock().get(key).cloned())
    }

    fn contains_key(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.records.lock().contains_key(key))
    }

    /// Iterates a snapshot taken at call time.
    fn load_all_raw(&self) -> StoreResult<RawEntries<'_>> {
        let snapshot: Vec<MarshaledEntry> = self.records.lock().values().cloned().collect();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }

    fn size(&self) -> StoreResult<usize> {
        Ok(self.len())
    }
}
