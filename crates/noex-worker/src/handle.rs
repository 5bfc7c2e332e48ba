//! [`BucketHandle`]: the cheap, cloneable reference clients and every other
//! component (transaction context, query engine, TTL scheduler, persistence
//! coordinator) use to talk to one bucket's worker thread.

use std::sync::mpsc::Sender;

use noex_bus::Event;
use noex_core::Record;

use crate::error::Result;
use crate::ops::{BucketSnapshot, CommitOp, Filter, UndoOp};
use crate::state::BucketStats;
use crate::worker::{self, Request};

/// A reference to one bucket's worker thread. Carries only a name and a
/// channel sender, so it is safe and cheap to clone freely (invariant:
/// handles never reach inside the worker's owned state).
#[derive(Clone)]
pub struct BucketHandle {
    name: String,
    tx: Sender<Request>,
}

impl BucketHandle {
    pub(crate) fn new(name: String, tx: Sender<Request>) -> Self {
        Self { name, tx }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn call<T>(&self, build: impl FnOnce(std::sync::mpsc::Sender<Result<T>>) -> Request) -> Result<T> {
        worker::call(&self.tx, &self.name, build)
    }

    pub fn insert(&self, record: Record) -> Result<Record> {
        self.call(|reply| Request::Insert { record, reply })
    }

    pub fn get(&self, key: &str) -> Result<Option<Record>> {
        self.call(|reply| Request::Get { key: key.to_owned(), reply })
    }

    pub fn update(&self, key: &str, changes: Record) -> Result<Record> {
        self.call(|reply| Request::Update {
            key: key.to_owned(),
            changes,
            reply,
        })
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.call(|reply| Request::Delete { key: key.to_owned(), reply })
    }

    pub fn clear(&self) -> Result<()> {
        self.call(|reply| Request::Clear { reply })
    }

    pub fn all(&self) -> Result<Vec<Record>> {
        self.call(|reply| Request::All { reply })
    }

    pub fn where_(&self, filter: Filter) -> Result<Vec<Record>> {
        self.call(|reply| Request::Where { filter, reply })
    }

    pub fn find_one(&self, filter: Filter) -> Result<Option<Record>> {
        self.call(|reply| Request::FindOne { filter, reply })
    }

    pub fn count(&self, filter: Option<Filter>) -> Result<usize> {
        self.call(|reply| Request::Count { filter, reply })
    }

    pub fn first(&self, n: usize) -> Result<Vec<Record>> {
        self.call(|reply| Request::First { n, reply })
    }

    pub fn last(&self, n: usize) -> Result<Vec<Record>> {
        self.call(|reply| Request::Last { n, reply })
    }

    pub fn paginate(&self, after: Option<String>, limit: usize) -> Result<Vec<Record>> {
        self.call(|reply| Request::Paginate { after, limit, reply })
    }

    pub fn sum(&self, field: &str, filter: Option<Filter>) -> Result<f64> {
        self.call(|reply| Request::Sum {
            field: field.to_owned(),
            filter,
            reply,
        })
    }

    pub fn avg(&self, field: &str, filter: Option<Filter>) -> Result<f64> {
        self.call(|reply| Request::Avg {
            field: field.to_owned(),
            filter,
            reply,
        })
    }

    pub fn min(&self, field: &str, filter: Option<Filter>) -> Result<Option<f64>> {
        self.call(|reply| Request::Min {
            field: field.to_owned(),
            filter,
            reply,
        })
    }

    pub fn max(&self, field: &str, filter: Option<Filter>) -> Result<Option<f64>> {
        self.call(|reply| Request::Max {
            field: field.to_owned(),
            filter,
            reply,
        })
    }

    pub fn purge_expired(&self, now_ms: i64) -> Result<usize> {
        self.call(|reply| Request::PurgeExpired { now_ms, reply })
    }

    pub fn snapshot(&self) -> Result<BucketSnapshot> {
        self.call(|reply| Request::Snapshot { reply })
    }

    pub fn commit_batch(&self, ops: Vec<CommitOp>) -> Result<(Vec<Event>, Vec<UndoOp>)> {
        self.call(|reply| Request::CommitBatch { ops, reply })
    }

    pub fn apply_undo(&self, undo: Vec<UndoOp>) -> Result<()> {
        self.call(|reply| Request::ApplyUndo { undo, reply })
    }

    pub fn stats(&self) -> Result<BucketStats> {
        self.call(|reply| Request::Stats { reply })
    }

    /// Idempotent: a second `stop()` after the thread has already exited
    /// just observes the closed-channel error.
    pub fn stop(&self) -> Result<()> {
        self.call(|reply| Request::Stop { reply })
    }
}
