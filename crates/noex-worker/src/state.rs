//! The pure bucket state machine: records, indexes, the autoincrement
//! counter, and every CRUD/query/commit operation. Free of any actor or
//! channel plumbing so it can be unit tested directly; [`crate::worker`]
//! wraps one instance per spawned thread.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicI64;

use noex_bus::Event;
use noex_core::{AutoIncrementCounter, BucketDefinition, Record, RecordMeta, SchemaValidator};
use noex_index::IndexManager;

use crate::error::{Result, WorkerError};
use crate::ops::{matches, primary_key_of, BucketSnapshot, CommitOp, Filter, UndoOp};

/// Running counters surfaced read-only through the handle, logged at
/// `tracing::debug!` granularity on every mutation.
#[derive(Debug, Clone, Default)]
pub struct BucketStats {
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub purges: u64,
    pub record_count: usize,
}

pub struct BucketState {
    pub def: BucketDefinition,
    records: BTreeMap<String, Record>,
    index: IndexManager,
    counter: AutoIncrementCounter,
    cuid_seq: AtomicI64,
    insertion_seq: BTreeMap<String, u64>,
    next_seq: u64,
    ttl_ms: Option<i64>,
    stats: BucketStats,
}

impl BucketState {
    pub fn new(def: BucketDefinition, ttl_ms: Option<i64>) -> Self {
        let index = IndexManager::from_definition(&def);
        Self {
            def,
            records: BTreeMap::new(),
            index,
            counter: AutoIncrementCounter::new(),
            cuid_seq: AtomicI64::new(0),
            insertion_seq: BTreeMap::new(),
            next_seq: 0,
            ttl_ms,
            stats: BucketStats::default(),
        }
    }

    /// Seeds state from a persisted or pre-crash snapshot. Invariant 8: the
    /// counter is restored to at least the snapshot's value, never lower.
    pub fn restore(def: BucketDefinition, ttl_ms: Option<i64>, snapshot: BucketSnapshot) -> Self {
        let mut state = Self::new(def, ttl_ms);
        for (key, record) in snapshot.records {
            state.index.add_record(&key, &record);
            state.next_seq += 1;
            state.insertion_seq.insert(key.clone(), state.next_seq);
            state.records.insert(key, record);
        }
        state.counter.restore(snapshot.autoincrement_counter);
        state.stats.record_count = state.records.len();
        state
    }

    fn validator(&self) -> SchemaValidator<'_> {
        SchemaValidator::new(&self.def.name, &self.def)
    }

    pub fn stats(&self) -> BucketStats {
        let mut s = self.stats.clone();
        s.record_count = self.records.len();
        s
    }

    pub fn get(&self, key: &str) -> Option<Record> {
        self.records.get(key).cloned()
    }

    pub fn insert(&mut self, input: Record) -> Result<(Record, Vec<Event>)> {
        let mut record = self.validator().prepare_insert(input, &self.counter, &self.cuid_seq)?;
        self.index.validate_insert(&record)?;

        let key = primary_key_of(&self.def, &record);

        if let Some(ttl) = self.ttl_ms {
            if record.meta_expires_at().is_none() {
                record.set_meta_expires_at(Some(record.meta_created_at() + ttl));
            }
        }

        let mut events = Vec::new();
        if let Some(max_size) = self.def.max_size {
            while self.records.len() >= max_size {
                let Some(victim) = self.oldest_key() else { break };
                if let Some(removed) = self.remove_internal(&victim) {
                    self.stats.evictions += 1;
                    events.push(Event::deleted(self.def.name.clone(), victim, removed));
                }
            }
        }

        self.index.add_record(&key, &record);
        self.next_seq += 1;
        self.insertion_seq.insert(key.clone(), self.next_seq);
        self.records.insert(key.clone(), record.clone());
        self.stats.inserts += 1;

        events.push(Event::inserted(self.def.name.clone(), key, record.clone()));
        tracing::debug!(bucket = %self.def.name, stats = ?self.stats(), "insert");
        Ok((record, events))
    }

    /// Key of the oldest record by ascending `_createdAt`, ties broken by
    /// ascending `_updatedAt`, then by insertion order.
    fn oldest_key(&self) -> Option<String> {
        self.records
            .iter()
            .min_by_key(|(key, record)| {
                (
                    record.meta_created_at(),
                    record.meta_updated_at(),
                    self.insertion_seq.get(*key).copied().unwrap_or(u64::MAX),
                )
            })
            .map(|(key, _)| key.clone())
    }

    fn remove_internal(&mut self, key: &str) -> Option<Record> {
        let record = self.records.remove(key)?;
        self.index.remove_record(key, &record);
        self.insertion_seq.remove(key);
        Some(record)
    }

    pub fn update(&mut self, key: &str, changes: Record) -> Result<(Record, Event)> {
        let old = self
            .records
            .get(key)
            .cloned()
            .ok_or_else(|| WorkerError::record_not_found(&self.def.name, key))?;

        let new = self.validator().prepare_update(&old, changes)?;
        self.index.validate_update(key, &old, &new)?;
        self.index.update_record(key, &old, &new);
        self.records.insert(key.to_owned(), new.clone());
        self.stats.updates += 1;

        tracing::debug!(bucket = %self.def.name, key, stats = ?self.stats(), "update");
        Ok((
            new.clone(),
            Event::updated(self.def.name.clone(), key.to_owned(), old, new),
        ))
    }

    /// No-op (returns `None`) if `key` is absent.
    pub fn delete(&mut self, key: &str) -> Option<Event> {
        let removed = self.remove_internal(key)?;
        self.stats.deletes += 1;
        tracing::debug!(bucket = %self.def.name, key, stats = ?self.stats(), "delete");
        Some(Event::deleted(self.def.name.clone(), key.to_owned(), removed))
    }

    /// Bulk semantics: no per-record `deleted` events (Design Notes, Open
    /// Question (b)).
    pub fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
        self.insertion_seq.clear();
    }

    /// Whether this bucket's primary-key field is numeric. The map itself
    /// is always keyed by the field's stringified display form (see
    /// `primary_key_of`), which only coincides with numeric order for
    /// single-digit values; numeric-keyed buckets need their own ordering
    /// pass to honor key-sorted iteration past that point.
    fn has_numeric_key(&self) -> bool {
        matches!(
            self.def.schema.get(&self.def.key).and_then(|f| f.field_type.as_ref()),
            Some(noex_core::FieldType::Number)
        )
    }

    /// Record pairs in key-sorted order. Numeric-keyed buckets (the common
    /// `autoincrement` case) sort by the primary key field's own decoded
    /// value so ids 1..10 read back as 1, 2, ..., 10, not the lexical
    /// "1", "10", "2", ... order their stringified map keys would give.
    fn ordered_records(&self) -> Vec<(String, Record)> {
        let mut pairs: Vec<(String, Record)> = self.records.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        if self.has_numeric_key() {
            pairs.sort_by(|a, b| {
                let va = a.1.get(&self.def.key).and_then(|v| v.as_f64()).unwrap_or(0.0);
                let vb = b.1.get(&self.def.key).and_then(|v| v.as_f64()).unwrap_or(0.0);
                va.total_cmp(&vb)
            });
        }
        pairs
    }

    pub fn all(&self) -> Vec<Record> {
        self.ordered_records().into_iter().map(|(_, r)| r).collect()
    }

    /// Candidate keys for a filter: narrowed to an index hit when any filter
    /// field is indexed, full scan otherwise. The remaining fields are then
    /// checked linearly with strict equality.
    fn candidates(&self, filter: &Filter) -> Vec<String> {
        for (field, value) in filter {
            if self.index.is_indexed(field) {
                return self.index.find_by_index(field, value);
            }
        }
        self.records.keys().cloned().collect()
    }

    pub fn where_(&self, filter: &Filter) -> Vec<Record> {
        self.candidates(filter)
            .into_iter()
            .filter_map(|key| self.records.get(&key).cloned())
            .filter(|record| matches(record, filter))
            .collect()
    }

    pub fn find_one(&self, filter: &Filter) -> Option<Record> {
        self.candidates(filter)
            .into_iter()
            .find_map(|key| {
                let record = self.records.get(&key)?;
                matches(record, filter).then(|| record.clone())
            })
    }

    pub fn count(&self, filter: Option<&Filter>) -> usize {
        match filter {
            Some(f) if !f.is_empty() => self
                .candidates(f)
                .into_iter()
                .filter(|key| self.records.get(key).map(|r| matches(r, f)).unwrap_or(false))
                .count(),
            _ => self.records.len(),
        }
    }

    pub fn first(&self, n: usize) -> Vec<Record> {
        self.ordered_records().into_iter().take(n).map(|(_, r)| r).collect()
    }

    pub fn last(&self, n: usize) -> Vec<Record> {
        let pairs = self.ordered_records();
        let len = pairs.len();
        let skip = len.saturating_sub(n);
        pairs.into_iter().skip(skip).map(|(_, r)| r).collect()
    }

    /// Records strictly after `after` in key-sorted order, capped at
    /// `limit`. `after = None` starts from the beginning. Numeric-keyed
    /// buckets compare by the cursor's decoded numeric value; others
    /// compare the cursor string lexically against the map key.
    pub fn paginate(&self, after: Option<&str>, limit: usize) -> Vec<Record> {
        let pairs = self.ordered_records();
        if self.has_numeric_key() {
            let after_val: Option<f64> = after.and_then(|a| a.parse::<f64>().ok());
            pairs
                .into_iter()
                .filter(|(_, r)| match after_val {
                    Some(av) => r.get(&self.def.key).and_then(|v| v.as_f64()).map(|v| v > av).unwrap_or(false),
                    None => true,
                })
                .take(limit)
                .map(|(_, r)| r)
                .collect()
        } else {
            pairs
                .into_iter()
                .filter(|(key, _)| after.map(|a| key.as_str() > a).unwrap_or(true))
                .take(limit)
                .map(|(_, r)| r)
                .collect()
        }
    }

    fn numeric_values<'a>(&'a self, field: &'a str, filter: Option<&'a Filter>) -> Vec<f64> {
        let records: Box<dyn Iterator<Item = &Record>> = match filter {
            Some(f) if !f.is_empty() => Box::new(
                self.candidates(f)
                    .into_iter()
                    .filter_map(move |key| self.records.get(&key))
                    .filter(move |r| matches(r, f)),
            ),
            _ => Box::new(self.records.values()),
        };
        records.filter_map(|r| r.get(field)).filter_map(|v| v.as_f64()).collect()
    }

    pub fn sum(&self, field: &str, filter: Option<&Filter>) -> f64 {
        self.numeric_values(field, filter).into_iter().sum()
    }

    pub fn avg(&self, field: &str, filter: Option<&Filter>) -> f64 {
        let values = self.numeric_values(field, filter);
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }

    pub fn min(&self, field: &str, filter: Option<&Filter>) -> Option<f64> {
        self.numeric_values(field, filter)
            .into_iter()
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.min(v))))
    }

    pub fn max(&self, field: &str, filter: Option<&Filter>) -> Option<f64> {
        self.numeric_values(field, filter)
            .into_iter()
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
    }

    /// Removes every record whose `_expiresAt <= now_ms`. Returns the
    /// `deleted` events for the caller to publish, plus the count removed.
    pub fn purge_expired(&mut self, now_ms: i64) -> Vec<Event> {
        let expired: Vec<String> = self
            .records
            .iter()
            .filter(|(_, r)| r.meta_expires_at().map(|e| e <= now_ms).unwrap_or(false))
            .map(|(k, _)| k.clone())
            .collect();

        let mut events = Vec::with_capacity(expired.len());
        for key in expired {
            if let Some(removed) = self.remove_internal(&key) {
                events.push(Event::deleted(self.def.name.clone(), key, removed));
            }
        }
        self.stats.purges += events.len() as u64;
        events
    }

    pub fn snapshot(&self) -> BucketSnapshot {
        BucketSnapshot {
            records: self.records.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            autoincrement_counter: self.counter.current(),
        }
    }

    /// Phase 1 (validate, no mutation) then phase 2 (apply, collecting undo
    /// ops and events). On any phase-1 failure nothing is mutated.
    pub fn commit_batch(&mut self, ops: &[CommitOp]) -> Result<(Vec<Event>, Vec<UndoOp>)> {
        for op in ops {
            match op {
                CommitOp::Insert { key, record } => {
                    if self.records.contains_key(key) {
                        return Err(WorkerError::conflict(
                            &self.def.name,
                            key,
                            Some("key already exists".into()),
                        ));
                    }
                    self.index.validate_insert(record)?;
                }
                CommitOp::Update { key, new_record, expected_version } => {
                    let current = self
                        .records
                        .get(key)
                        .ok_or_else(|| WorkerError::record_not_found(&self.def.name, key))?;
                    if current.meta_version() != *expected_version {
                        return Err(WorkerError::conflict(&self.def.name, key, Some("version mismatch".into())));
                    }
                    self.index.validate_update(key, current, new_record)?;
                }
                CommitOp::Delete { key, expected_version } => {
                    if let Some(current) = self.records.get(key) {
                        if current.meta_version() != *expected_version {
                            return Err(WorkerError::conflict(&self.def.name, key, Some("version mismatch".into())));
                        }
                    }
                    // Absent key: idempotent no-op, validated above by `get`.
                }
            }
        }

        let mut events = Vec::with_capacity(ops.len());
        let mut undo = Vec::with_capacity(ops.len());

        for op in ops {
            match op {
                CommitOp::Insert { key, record } => {
                    self.index.add_record(key, record);
                    self.next_seq += 1;
                    self.insertion_seq.insert(key.clone(), self.next_seq);
                    self.records.insert(key.clone(), record.clone());
                    self.stats.inserts += 1;
                    undo.push(UndoOp::UndoInsert { key: key.clone() });
                    events.push(Event::inserted(self.def.name.clone(), key.clone(), record.clone()));
                }
                CommitOp::Update { key, new_record, .. } => {
                    let old = self.records.get(key).cloned().unwrap();
                    self.index.update_record(key, &old, new_record);
                    self.records.insert(key.clone(), new_record.clone());
                    self.stats.updates += 1;
                    undo.push(UndoOp::UndoUpdate { key: key.clone(), old_record: old.clone() });
                    events.push(Event::updated(self.def.name.clone(), key.clone(), old, new_record.clone()));
                }
                CommitOp::Delete { key, .. } => {
                    if let Some(removed) = self.remove_internal(key) {
                        self.stats.deletes += 1;
                        undo.push(UndoOp::UndoDelete { key: key.clone(), removed_record: removed.clone() });
                        events.push(Event::deleted(self.def.name.clone(), key.clone(), removed));
                    }
                }
            }
        }

        Ok((events, undo))
    }

    /// Applies undo ops in reverse order. Best-effort: an op whose
    /// preconditions no longer hold is logged and skipped rather than
    /// panicking, since this runs during already-in-progress error recovery.
    pub fn apply_undo(&mut self, undo: Vec<UndoOp>) {
        for op in undo.into_iter().rev() {
            match op {
                UndoOp::UndoInsert { key } => {
                    if self.remove_internal(&key).is_none() {
                        tracing::warn!(bucket = %self.def.name, key, "undo insert: key already absent");
                    }
                }
                UndoOp::UndoUpdate { key, old_record } => match self.records.get(&key).cloned() {
                    Some(current) => {
                        self.index.update_record(&key, &current, &old_record);
                        self.records.insert(key, old_record);
                    }
                    None => tracing::warn!(bucket = %self.def.name, key, "undo update: key missing"),
                },
                UndoOp::UndoDelete { key, removed_record } => {
                    self.index.add_record(&key, &removed_record);
                    self.next_seq += 1;
                    self.insertion_seq.insert(key.clone(), self.next_seq);
                    self.records.insert(key, removed_record);
                }
            }
        }
    }
}
