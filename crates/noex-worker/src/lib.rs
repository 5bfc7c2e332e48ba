//! noex-worker -- the per-bucket actor: a single OS thread that exclusively
//! owns one bucket's records, indexes, schema validation, and the two-phase
//! commit-batch protocol. All access goes through a [`BucketHandle`]; no
//! other code ever reaches inside.

mod error;
mod ops;
mod state;
mod worker;

mod handle;

use std::thread::JoinHandle;

use noex_bus::EventBus;
use noex_core::BucketDefinition;

pub use error::{Result, WorkerError};
pub use handle::BucketHandle;
pub use ops::{matches, primary_key_of, BucketSnapshot, CommitOp, Filter, UndoOp};
pub use state::BucketStats;

/// Spawns a new bucket worker thread, optionally seeded from a persisted
/// snapshot, and returns a handle to it plus the thread's `JoinHandle` for
/// the supervisor.
pub fn spawn_bucket(
    def: BucketDefinition,
    ttl_ms: Option<i64>,
    seed: Option<BucketSnapshot>,
    bus: EventBus,
) -> (BucketHandle, JoinHandle<()>) {
    let name = def.name.clone();
    let (tx, join) = worker::spawn(def, ttl_ms, seed, bus);
    (BucketHandle::new(name, tx), join)
}
