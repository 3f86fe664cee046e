//! Persistence Module
//!
//! Write-through and write-behind coordination between the in-memory
//! container and a pluggable backing store.

mod coordinator;
mod file;
mod marshal;
mod memory;
mod modification;
mod store;

pub use coordinator::{
    ErrorListener, LoadAll, OverflowPolicy, MAX_APPLY_ATTEMPTS, PersistenceConfig, PersistenceCoordinator,
    PersistenceMode,
};
pub use file::FileStore;
pub use marshal::{marshal, marshal_entry, unmarshal, unmarshal_entry};
pub use memory::MemoryStore;
pub use modification::Modification;
pub use store::{BackingStore, EntryMetadata, MarshaledEntry, RawEntries};
