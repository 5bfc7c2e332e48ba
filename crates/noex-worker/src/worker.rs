//! The bucket worker actor: one OS thread owning one [`BucketState`],
//! serialized behind an `mpsc::Receiver<Request>`. Every request carries a
//! one-shot reply channel; the reply payload is always `Result<T,
//! WorkerError>` so the handle has one uniform call shape.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use noex_bus::{Event, EventBus};
use noex_core::{BucketDefinition, Record};

use crate::error::{Result, WorkerError};
use crate::ops::{BucketSnapshot, CommitOp, Filter, UndoOp};
use crate::state::{BucketState, BucketStats};

type Reply<T> = Sender<Result<T>>;

pub(crate) enum Request {
    Insert { record: Record, reply: Reply<Record> },
    Get { key: String, reply: Reply<Option<Record>> },
    Update { key: String, changes: Record, reply: Reply<Record> },
    Delete { key: String, reply: Reply<()> },
    Clear { reply: Reply<()> },
    All { reply: Reply<Vec<Record>> },
    Where { filter: Filter, reply: Reply<Vec<Record>> },
    FindOne { filter: Filter, reply: Reply<Option<Record>> },
    Count { filter: Option<Filter>, reply: Reply<usize> },
    First { n: usize, reply: Reply<Vec<Record>> },
    Last { n: usize, reply: Reply<Vec<Record>> },
    Paginate { after: Option<String>, limit: usize, reply: Reply<Vec<Record>> },
    Sum { field: String, filter: Option<Filter>, reply: Reply<f64> },
    Avg { field: String, filter: Option<Filter>, reply: Reply<f64> },
    Min { field: String, filter: Option<Filter>, reply: Reply<Option<f64>> },
    Max { field: String, filter: Option<Filter>, reply: Reply<Option<f64>> },
    PurgeExpired { now_ms: i64, reply: Reply<usize> },
    Snapshot { reply: Reply<BucketSnapshot> },
    CommitBatch { ops: Vec<CommitOp>, reply: Reply<(Vec<Event>, Vec<UndoOp>)> },
    ApplyUndo { undo: Vec<UndoOp>, reply: Reply<()> },
    Stats { reply: Reply<BucketStats> },
    Stop { reply: Reply<()> },
}

/// Spawns the worker thread and returns the channel sender the handle wraps,
/// plus the thread's `JoinHandle` for the supervisor.
pub(crate) fn spawn(
    def: BucketDefinition,
    ttl_ms: Option<i64>,
    seed: Option<BucketSnapshot>,
    bus: EventBus,
) -> (Sender<Request>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel::<Request>();
    let bucket_name = def.name.clone();

    let join = thread::Builder::new()
        .name(format!("noex-bucket-{bucket_name}"))
        .spawn(move || run(def, ttl_ms, seed, bus, rx))
        .expect("failed to spawn bucket worker thread");

    (tx, join)
}

fn run(
    def: BucketDefinition,
    ttl_ms: Option<i64>,
    seed: Option<BucketSnapshot>,
    bus: EventBus,
    rx: Receiver<Request>,
) {
    let mut state = match seed {
        Some(snapshot) => BucketState::restore(def, ttl_ms, snapshot),
        None => BucketState::new(def, ttl_ms),
    };

    for request in rx {
        match request {
            Request::Insert { record, reply } => match state.insert(record) {
                Ok((result, events)) => {
                    bus.publish_all(events);
                    let _ = reply.send(Ok(result));
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Request::Get { key, reply } => {
                let _ = reply.send(Ok(state.get(&key)));
            }
            Request::Update { key, changes, reply } => match state.update(&key, changes) {
                Ok((result, event)) => {
                    bus.publish(event);
                    let _ = reply.send(Ok(result));
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Request::Delete { key, reply } => {
                if let Some(event) = state.delete(&key) {
                    bus.publish(event);
                }
                let _ = reply.send(Ok(()));
            }
            Request::Clear { reply } => {
                state.clear();
                let _ = reply.send(Ok(()));
            }
            Request::All { reply } => {
                let _ = reply.send(Ok(state.all()));
            }
            Request::Where { filter, reply } => {
                let _ = reply.send(Ok(state.where_(&filter)));
            }
            Request::FindOne { filter, reply } => {
                let _ = reply.send(Ok(state.find_one(&filter)));
            }
            Request::Count { filter, reply } => {
                let _ = reply.send(Ok(state.count(filter.as_ref())));
            }
            Request::First { n, reply } => {
                let _ = reply.send(Ok(state.first(n)));
            }
            Request::Last { n, reply } => {
                let _ = reply.send(Ok(state.last(n)));
            }
            Request::Paginate { after, limit, reply } => {
                let _ = reply.send(Ok(state.paginate(after.as_deref(), limit)));
            }
            Request::Sum { field, filter, reply } => {
                let _ = reply.send(Ok(state.sum(&field, filter.as_ref())));
            }
            Request::Avg { field, filter, reply } => {
                let _ = reply.send(Ok(state.avg(&field, filter.as_ref())));
            }
            Request::Min { field, filter, reply } => {
                let _ = reply.send(Ok(state.min(&field, filter.as_ref())));
            }
            Request::Max { field, filter, reply } => {
                let _ = reply.send(Ok(state.max(&field, filter.as_ref())));
            }
            Request::PurgeExpired { now_ms, reply } => {
                let events = state.purge_expired(now_ms);
                let count = events.len();
                bus.publish_all(events);
                let _ = reply.send(Ok(count));
            }
            Request::Snapshot { reply } => {
                let _ = reply.send(Ok(state.snapshot()));
            }
            Request::CommitBatch { ops, reply } => {
                let _ = reply.send(state.commit_batch(&ops));
            }
            Request::ApplyUndo { undo, reply } => {
                state.apply_undo(undo);
                let _ = reply.send(Ok(()));
            }
            Request::Stats { reply } => {
                let _ = reply.send(Ok(state.stats()));
            }
            Request::Stop { reply } => {
                let _ = reply.send(Ok(()));
                break;
            }
        }
    }
}

/// Sends `request` and blocks for the reply; a closed channel (worker
/// thread already stopped) surfaces as [`WorkerError::closed`].
pub(crate) fn call<T>(
    tx: &Sender<Request>,
    bucket: &str,
    build: impl FnOnce(Reply<T>) -> Request,
) -> Result<T> {
    let (reply_tx, reply_rx) = mpsc::channel();
    tx.send(build(reply_tx)).map_err(|_| WorkerError::closed(bucket))?;
    reply_rx.recv().map_err(|_| WorkerError::closed(bucket))?
}
