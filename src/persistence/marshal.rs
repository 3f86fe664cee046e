//! Marshaling Module
//!
//! Converts typed cache entries into store records and back using serde_json.
//! Key bytes must be stable for equal keys, which holds for the scalar and
//! string keys the grid is used with.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::{CacheEntry, TimeService};
use crate::error::StoreResult;
use crate::persistence::MarshaledEntry;

pub fn marshal<T: Serialize + ?Sized>(value: &T) -> StoreResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub fn unmarshal<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Marshals an entry, converting its timestamps to wall-clock metadata.
pub fn marshal_entry<K, V>(entry: &CacheEntry<K, V>, time: &dyn TimeService) -> StoreResult<MarshaledEntry>
where
    K: Serialize,
    V: Serialize,
{
    Ok(MarshaledEntry {
        key: marshal(&entry.key)?,
        value: marshal(&entry.value)?,
        metadata: entry.metadata(time),
    })
}

pub fn unmarshal_entry<K, V>(raw: &MarshaledEntry, time: &dyn TimeService) -> StoreResult<CacheEntry<K, V>>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    Ok(CacheEntry::from_metadata(
        unmarshal(&raw.key)?,
        unmarshal(&raw.value)?,
        &raw.metadata,
        time,
    ))
}
