//! Shared vocabulary: filters, commit-batch ops, undo ops, and snapshots.

use std::collections::BTreeMap;

use noex_core::{BucketDefinition, Record, Value};

/// A flat equality filter: every listed field must strictly equal the given
/// value for a record to match. Fields absent from the filter are
/// unconstrained.
pub type Filter = BTreeMap<String, Value>;

pub fn matches(record: &Record, filter: &Filter) -> bool {
    filter.iter().all(|(field, value)| record.get(field) == Some(value))
}

/// The primary-key field's value, as the string used for the record map key.
/// Strings pass through verbatim; numeric and other primary-key types
/// (`autoincrement` is the common non-string case) use their natural display
/// form, which is stable and collision-free within one `Value` type.
///
/// This is purely a storage/lookup key, not an iteration order: the map it
/// indexes is a `BTreeMap<String, Record>`, so lexical order of this string
/// only coincides with numeric order below ten. `BucketState::ordered_records`
/// re-sorts numeric-keyed buckets by the field's decoded value for `all`/
/// `first`/`last`/`paginate` rather than trusting the map's own order.
pub fn primary_key_of(def: &BucketDefinition, record: &Record) -> String {
    match record.get(&def.key) {
        Some(Value::Str(s)) => s.clone(),
        Some(Value::Int(i)) => i.to_string(),
        Some(Value::Float(f)) => f.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => format!("{other:?}"),
        None => String::new(),
    }
}

/// A point-in-time, atomic copy of a bucket's records and autoincrement
/// counter, suitable for persistence or for commit-batch undo-by-snapshot.
#[derive(Debug, Clone)]
pub struct BucketSnapshot {
    pub records: Vec<(String, Record)>,
    pub autoincrement_counter: i64,
}

/// One operation in an ordered commit batch, as buffered by a transaction's
/// write buffer.
#[derive(Debug, Clone)]
pub enum CommitOp {
    Insert {
        key: String,
        record: Record,
    },
    Update {
        key: String,
        new_record: Record,
        expected_version: i64,
    },
    Delete {
        key: String,
        expected_version: i64,
    },
}

impl CommitOp {
    pub fn key(&self) -> &str {
        match self {
            CommitOp::Insert { key, .. } => key,
            CommitOp::Update { key, .. } => key,
            CommitOp::Delete { key, .. } => key,
        }
    }
}

/// The inverse of one applied commit op, used by `apply_undo` to roll a
/// bucket back to its pre-commit state. Best-effort: failures during undo
/// are logged and ignored.
#[derive(Debug, Clone)]
pub enum UndoOp {
    /// Undo an insert: remove the key.
    UndoInsert { key: String },
    /// Undo an update: restore the prior record verbatim.
    UndoUpdate { key: String, old_record: Record },
    /// Undo a delete: re-insert the removed record verbatim.
    UndoDelete { key: String, removed_record: Record },
}
