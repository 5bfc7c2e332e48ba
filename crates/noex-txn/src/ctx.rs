//! The transaction context: a cache of per-bucket write buffers and
//! transactional handles, plus the multi-bucket two-phase commit.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicI64;

use noex_bus::EventBus;
use noex_core::{AutoIncrementCounter, BucketDefinition, Record, RecordMeta, SchemaValidator};
use noex_worker::{primary_key_of, matches, BucketHandle, Filter};

use crate::buffer::{Overlay, WriteBuffer};
use crate::error::{Result, TxnError};

/// What `TransactionContext` needs from the store to resolve bucket names
/// into live handles and definitions, without depending on the store crate
/// directly (it implements this trait instead).
pub trait BucketProvider {
    fn bucket_handle(&self, name: &str) -> std::result::Result<BucketHandle, TxnError>;
    fn bucket_definition(&self, name: &str) -> std::result::Result<BucketDefinition, TxnError>;
}

struct BucketTxState {
    buffer: WriteBuffer,
    counter: AutoIncrementCounter,
    cuid_seq: AtomicI64,
    seeded: bool,
}

impl BucketTxState {
    fn new(bucket: &str) -> Self {
        Self {
            buffer: WriteBuffer::new(bucket),
            counter: AutoIncrementCounter::new(),
            cuid_seq: AtomicI64::new(0),
            seeded: false,
        }
    }
}

/// Owns every bucket's write buffer for the lifetime of one `transaction`
/// call. Cheap to borrow repeatedly via `bucket(name)`; never `Send` across
/// threads (a transaction runs entirely on the caller's thread).
pub struct TransactionContext<'p> {
    provider: &'p dyn BucketProvider,
    bus: &'p EventBus,
    states: RefCell<BTreeMap<String, BucketTxState>>,
}

impl<'p> TransactionContext<'p> {
    fn new(provider: &'p dyn BucketProvider, bus: &'p EventBus) -> Self {
        Self {
            provider,
            bus,
            states: RefCell::new(BTreeMap::new()),
        }
    }

    /// A transactional handle scoped to one bucket. Lazily creates and caches
    /// that bucket's write buffer on first touch, seeding its autoincrement
    /// counter from the live worker's current snapshot.
    ///
    /// Two concurrent transactions that both insert into the same
    /// `autoincrement`-keyed bucket can seed an overlapping counter range;
    /// this surfaces as a `TransactionConflict` at commit rather than
    /// silently producing two records with the same key (see DESIGN.md).
    pub fn bucket<'a>(&'a self, name: &str) -> Result<TxBucketHandle<'a, 'p>> {
        let handle = self.provider.bucket_handle(name)?;
        let def = self.provider.bucket_definition(name)?;

        {
            let mut states = self.states.borrow_mut();
            if !states.contains_key(name) {
                states.insert(name.to_owned(), BucketTxState::new(name));
            }
            let state = states.get_mut(name).unwrap();
            if !state.seeded {
                if let Ok(snapshot) = handle.snapshot() {
                    state.counter.restore(snapshot.autoincrement_counter);
                }
                state.seeded = true;
            }
        }

        Ok(TxBucketHandle {
            ctx: self,
            name: name.to_owned(),
            handle,
            def,
        })
    }

    fn with_state<T>(&self, name: &str, f: impl FnOnce(&mut BucketTxState) -> T) -> T {
        let mut states = self.states.borrow_mut();
        f(states.get_mut(name).expect("bucket touched before state created"))
    }

    /// Runs `callback`, then commits every touched bucket's buffer in
    /// deterministic (sorted) order, rolling back already-committed buckets
    /// on any failure. The callback's return value becomes the transaction's
    /// return value.
    fn execute<T>(provider: &'p dyn BucketProvider, bus: &'p EventBus, callback: impl FnOnce(&TransactionContext<'p>) -> Result<T>) -> Result<T> {
        let ctx = TransactionContext::new(provider, bus);
        let result = callback(&ctx)?;

        let touched: Vec<String> = ctx
            .states
            .borrow()
            .iter()
            .filter(|(_, state)| !state.buffer.is_empty())
            .map(|(name, _)| name.clone())
            .collect();

        if touched.is_empty() {
            return Ok(result);
        }

        let mut committed: Vec<(String, Vec<noex_worker::UndoOp>)> = Vec::new();
        let mut all_events = Vec::new();

        for name in &touched {
            let handle = provider.bucket_handle(name)?;
            let ops = ctx.with_state(name, |state| state.buffer.to_commit_ops());
            if ops.is_empty() {
                continue;
            }
            match handle.commit_batch(ops) {
                Ok((events, undo)) => {
                    all_events.extend(events);
                    committed.push((name.clone(), undo));
                }
                Err(e) => {
                    for (done_name, undo) in committed.into_iter().rev() {
                        if let Ok(done_handle) = provider.bucket_handle(&done_name) {
                            let _ = done_handle.apply_undo(undo);
                        }
                    }
                    return Err(TxnError::from(e));
                }
            }
        }

        bus.publish_all(all_events);
        Ok(result)
    }
}

/// Runs `callback` inside a fresh transaction context. This is the crate's
/// only public entry point; `noex-store`'s `Store::transaction` wraps it.
pub fn run<'p, T>(
    provider: &'p dyn BucketProvider,
    bus: &'p EventBus,
    callback: impl FnOnce(&TransactionContext<'p>) -> Result<T>,
) -> Result<T> {
    TransactionContext::execute(provider, bus, callback)
}

/// A transaction-scoped handle to one bucket: every read applies the
/// transaction's own overlay before (or instead of) reaching the live
/// worker; every write lands in the buffer, never the worker, until commit.
pub struct TxBucketHandle<'a, 'p> {
    ctx: &'a TransactionContext<'p>,
    name: String,
    handle: BucketHandle,
    def: BucketDefinition,
}

impl<'a, 'p> TxBucketHandle<'a, 'p> {
    fn validator(&self) -> SchemaValidator<'_> {
        SchemaValidator::new(&self.def.name, &self.def)
    }

    pub fn insert(&self, input: Record) -> Result<Record> {
        let record = self.ctx.with_state(&self.name, |state| {
            self.validator().prepare_insert(input, &state.counter, &state.cuid_seq)
        })?;
        let key = primary_key_of(&self.def, &record);
        self.ctx
            .with_state(&self.name, |state| state.buffer.buffer_insert(&key, record.clone()))?;
        Ok(record)
    }

    pub fn get(&self, key: &str) -> Result<Option<Record>> {
        let overlay = self.ctx.with_state(&self.name, |state| match state.buffer.overlay(key) {
            Overlay::Buffered(r) => Some(Some(r)),
            Overlay::Deleted => Some(None),
            Overlay::NotBuffered => None,
        });
        match overlay {
            Some(result) => Ok(result),
            None => Ok(self.handle.get(key)?),
        }
    }

    pub fn update(&self, key: &str, changes: Record) -> Result<Record> {
        let current = self.get(key)?.ok_or_else(|| {
            TxnError::Worker(noex_worker::WorkerError::record_not_found(&self.name, key))
        })?;
        let expected_version = current.meta_version();
        let new_record = self.validator().prepare_update(&current, changes)?;

        self.ctx.with_state(&self.name, |state| {
            state.buffer.buffer_update(key, new_record.clone(), expected_version, current)
        })?;
        Ok(new_record)
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        let Some(current) = self.get(key)? else {
            return Ok(());
        };
        let expected_version = current.meta_version();
        self.ctx
            .with_state(&self.name, |state| state.buffer.buffer_delete(key, expected_version, current))
    }

    /// Live worker records, with buffered deletes filtered out, buffered
    /// updates overlaid, and buffered inserts appended -- then the caller's
    /// filter applied on top of that merged view.
    fn overlaid_records(&self) -> Result<Vec<Record>> {
        let base = self.handle.all()?;
        let mut merged: Vec<Record> = self.ctx.with_state(&self.name, |state| {
            let mut out: Vec<Record> = base
                .into_iter()
                .filter(|r| {
                    let key = primary_key_of(&self.def, r);
                    !state.buffer.is_deleted(&key)
                })
                .map(|r| {
                    let key = primary_key_of(&self.def, &r);
                    match state.buffer.overlay(&key) {
                        Overlay::Buffered(overlaid) => overlaid,
                        _ => r,
                    }
                })
                .collect();
            out.extend(state.buffer.buffered_inserts().cloned());
            out
        });
        merged.sort_by(|a, b| primary_key_of(&self.def, a).cmp(&primary_key_of(&self.def, b)));
        Ok(merged)
    }

    pub fn all(&self) -> Result<Vec<Record>> {
        self.overlaid_records()
    }

    pub fn where_(&self, filter: Filter) -> Result<Vec<Record>> {
        Ok(self.overlaid_records()?.into_iter().filter(|r| matches(r, &filter)).collect())
    }

    pub fn find_one(&self, filter: Filter) -> Result<Option<Record>> {
        Ok(self.overlaid_records()?.into_iter().find(|r| matches(r, &filter)))
    }

    pub fn count(&self, filter: Option<Filter>) -> Result<usize> {
        let records = self.overlaid_records()?;
        Ok(match filter {
            Some(f) if !f.is_empty() => records.iter().filter(|r| matches(r, &f)).count(),
            _ => records.len(),
        })
    }
}
