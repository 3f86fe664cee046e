//! File Store Module
//!
//! One JSON file per key under a directory. File names are the hex encoding of
//! the marshaled key, so any key maps to a valid, unique name. Writes go to a
//! temp file in the same directory and are renamed into place, so a crash never
//! leaves a half-written record behind.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::persistence::{BackingStore, EntryMetadata, MarshaledEntry, RawEntries};

const RECORD_EXTENSION: &str = "json";

/// On-disk form of a record.
#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    key: String,
    value: String,
    metadata: EntryMetadata,
}

impl FileRecord {
    fn from_entry(entry: &MarshaledEntry) -> Self {
        Self {
            key: hex::encode(&entry.key),
            value: hex::encode(&entry.value),
            metadata: entry.metadata,
        }
    }

    fn into_entry(self) -> StoreResult<MarshaledEntry> {
        Ok(MarshaledEntry {
            key: decode_hex(&self.key)?,
            value: decode_hex(&self.value)?,
            metadata: self.metadata,
        })
    }
}

fn decode_hex(s: &str) -> StoreResult<Vec<u8>> {
    hex::decode(s).map_err(|e| StoreError::Backend(format!("corrupt record: {e}")))
}

// == File Store ==
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        debug!("Opened file store at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &[u8]) -> PathBuf {
        self.dir
            .join(format!("{}.{}", hex::encode(key), RECORD_EXTENSION))
    }

    fn is_record(path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == RECORD_EXTENSION)
    }

    fn read_record(path: &Path) -> StoreResult<Option<MarshaledEntry>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: FileRecord = serde_json::from_slice(&bytes)?;
        record.into_entry().map(Some)
    }
}

impl BackingStore for FileStore {
    fn write(&self, entry: &MarshaledEntry) -> StoreResult<()> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer(&mut tmp, &FileRecord::from_entry(entry))?;
        tmp.flush()?;
        tmp.persist(self.record_path(&entry.key))
            .map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StoreResult<bool> {
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> StoreResult<()> {
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if Self::is_record(&path) {
                match fs::remove_file(&path) {
                    Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn load(&self, key: &[u8]) -> StoreResult<Option<MarshaledEntry>> {
        Self::read_record(&self.record_path(key))
    }

    fn contains_key(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.record_path(key).is_file())
    }

    /// Walks the directory lazily; a record deleted mid-walk is skipped.
    fn load_all_raw(&self) -> StoreResult<RawEntries<'_>> {
        let walk = fs::read_dir(&self.dir)?;
        let records = walk.filter_map(|dir_entry| {
            let path = match dir_entry {
                Ok(dir_entry) => dir_entry.path(),
                Err(e) => return Some(Err(StoreError::from(e))),
            };
            if !Self::is_record(&path) {
                return None;
            }
            Self::read_record(&path).transpose()
        });
        Ok(Box::new(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(key: &[u8], value: &str) -> MarshaledEntry {
        MarshaledEntry {
            key: key.to_vec(),
            value: value.as_bytes().to_vec(),
            metadata: EntryMetadata {
                created_ms: 10,
                last_used_ms: 20,
                lifespan_ms: Some(1_000),
                max_idle_ms: None,
            },
        }
    }

    #[test]
    fn test_write_then_load() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.write(&record(b"\"k\"", "v1")).unwrap();
        store.write(&record(b"\"k\"", "v2")).unwrap();

        assert_eq!(store.load(b"\"k\"").unwrap(), Some(record(b"\"k\"", "v2")));
        assert!(store.contains_key(b"\"k\"").unwrap());
        assert_eq!(store.size().unwrap(), 1);
    }

    #[test]
    fn test_awkward_key_bytes() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let key = b"../etc/passwd\0\xff";

        store.write(&record(key, "v")).unwrap();
        assert_eq!(store.load(key).unwrap().map(|r| r.key), Some(key.to_vec()));
        assert!(store.delete(key).unwrap());
        assert!(!store.delete(key).unwrap());
    }

    #[test]
    fn test_clear_and_load_all() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        for i in 0..5 {
            store.write(&record(format!("k{i}").as_bytes(), "v")).unwrap();
        }
        // stray files are ignored
        fs::write(dir.path().join("notes.txt"), "hello").unwrap();

        let loaded: Vec<MarshaledEntry> = store
            .load_all_raw()
            .unwrap()
            .collect::<StoreResult<_>>()
            .unwrap();
        assert_eq!(loaded.len(), 5);

        store.clear().unwrap();
        assert_eq!(store.size().unwrap(), 0);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_reopen_sees_previous_records() {
        let dir = TempDir::new().unwrap();
        FileStore::open(dir.path())
            .unwrap()
            .write(&record(b"k", "v"))
            .unwrap();

        let reopened = FileStore::open(dir.path()).unwrap();
        assert!(reopened.load(b"k").unwrap().is_some());
    }

    #[test]
    fn test_corrupt_record_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        fs::write(store.record_path(b"k"), "{not json").unwrap();

        assert!(matches!(store.load(b"k"), Err(StoreError::Serialization(_))));
    }
}
