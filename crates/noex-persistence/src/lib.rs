//! noex-persistence -- pluggable durability: the `StorageAdapter` trait, the
//! persisted blob shape, and a dirty-tracking coordinator that debounces
//! flushes off the shared event bus.

mod adapter;
mod coordinator;
mod error;

pub use adapter::{InMemoryAdapter, JsonFileAdapter, PersistedBlob, PersistedMetadata, PersistedState, StorageAdapter, SCHEMA_VERSION};
pub use coordinator::PersistenceCoordinator;
pub use error::{PersistenceError, Result};
