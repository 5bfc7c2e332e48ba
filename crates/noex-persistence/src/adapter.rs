//! The `StorageAdapter` trait, the persisted blob shape, and two adapters:
//! an in-memory one for tests and a JSON-file one for local/embedded use.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use noex_core::record::now_ms;
use noex_core::Record;
use noex_worker::BucketSnapshot;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub records: Vec<(String, Record)>,
    pub autoincrement_counter: i64,
}

impl From<BucketSnapshot> for PersistedState {
    fn from(snapshot: BucketSnapshot) -> Self {
        Self {
            records: snapshot.records,
            autoincrement_counter: snapshot.autoincrement_counter,
        }
    }
}

impl From<PersistedState> for BucketSnapshot {
    fn from(state: PersistedState) -> Self {
        BucketSnapshot {
            records: state.records,
            autoincrement_counter: state.autoincrement_counter,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedMetadata {
    pub persisted_at: i64,
    pub server_id: String,
    pub schema_version: u32,
}

/// What one `save`/`load` round-trips: a bucket's state plus bookkeeping
/// metadata about when and by whom it was written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedBlob {
    pub state: PersistedState,
    pub metadata: PersistedMetadata,
}

impl PersistedBlob {
    pub fn new(state: PersistedState, server_id: impl Into<String>) -> Self {
        Self {
            state,
            metadata: PersistedMetadata {
                persisted_at: now_ms(),
                server_id: server_id.into(),
                schema_version: SCHEMA_VERSION,
            },
        }
    }
}

/// External persistence backend. `close` defaults to a no-op for adapters
/// with nothing to release.
pub trait StorageAdapter: Send + Sync {
    fn save(&self, key: &str, blob: &PersistedBlob) -> Result<()>;
    fn load(&self, key: &str) -> Result<Option<PersistedBlob>>;

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A process-local adapter backed by a `Mutex<BTreeMap>`. Useful for tests
/// and for embedding without real durability.
#[derive(Default)]
pub struct InMemoryAdapter {
    store: Mutex<BTreeMap<String, PersistedBlob>>,
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageAdapter for InMemoryAdapter {
    fn save(&self, key: &str, blob: &PersistedBlob) -> Result<()> {
        self.store.lock().unwrap().insert(key.to_owned(), blob.clone());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<PersistedBlob>> {
        Ok(self.store.lock().unwrap().get(key).cloned())
    }
}

/// An adapter that writes one JSON file per key under a base directory.
/// Keys are sanitized (`:` and `/` replaced with `_`) to produce a flat,
/// filesystem-safe filename.
pub struct JsonFileAdapter {
    base_dir: PathBuf,
}

impl JsonFileAdapter {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let filename: String = key.chars().map(|c| if c == ':' || c == '/' { '_' } else { c }).collect();
        self.base_dir.join(format!("{filename}.json"))
    }
}

impl StorageAdapter for JsonFileAdapter {
    fn save(&self, key: &str, blob: &PersistedBlob) -> Result<()> {
        fs::create_dir_all(&self.base_dir)?;
        let path = self.path_for(key);
        let json = serde_json::to_vec_pretty(blob)?;
        fs::write(&path, json)?;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<PersistedBlob>> {
        let path = self.path_for(key);
        if !Path::new(&path).exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        let blob = serde_json::from_slice(&bytes)?;
        Ok(Some(blob))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> PersistedState {
        PersistedState {
            records: vec![("k1".to_owned(), Record::new())],
            autoincrement_counter: 5,
        }
    }

    #[test]
    fn in_memory_adapter_round_trips() {
        let adapter = InMemoryAdapter::new();
        let blob = PersistedBlob::new(state(), "server-1");
        adapter.save("store:bucket:users", &blob).unwrap();

        let loaded = adapter.load("store:bucket:users").unwrap().unwrap();
        assert_eq!(loaded.state.autoincrement_counter, 5);
    }

    #[test]
    fn in_memory_adapter_missing_key_is_none() {
        let adapter = InMemoryAdapter::new();
        assert!(adapter.load("nope").unwrap().is_none());
    }

    #[test]
    fn json_file_adapter_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = JsonFileAdapter::new(dir.path());
        let blob = PersistedBlob::new(state(), "server-1");
        adapter.save("store:bucket:users", &blob).unwrap();

        let loaded = adapter.load("store:bucket:users").unwrap().unwrap();
        assert_eq!(loaded.state.records.len(), 1);
        assert_eq!(loaded.metadata.schema_version, SCHEMA_VERSION);
    }
}
