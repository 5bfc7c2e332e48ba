//! Per-bucket scratch for one transaction: an ordered, coalesced op log plus
//! the overlay lookup that gives the transaction read-your-own-writes.

use noex_core::Record;
use noex_worker::CommitOp;

use crate::error::{Result, TxnError};

/// One key's buffered state within a bucket's write buffer.
#[derive(Debug, Clone)]
enum BufferedOp {
    Insert(Record),
    Update {
        new_record: Record,
        expected_version: i64,
        old_record: Record,
    },
    Delete {
        expected_version: i64,
        old_record: Record,
    },
}

/// What a transactional read sees for one key: the caller falls through to
/// the live worker only on `NotBuffered`.
pub enum Overlay {
    Buffered(Record),
    Deleted,
    NotBuffered,
}

/// A single bucket's buffered writes for the lifetime of one transaction.
/// `order` preserves first-touch order for commit; `ops` holds the coalesced,
/// latest state per key.
#[derive(Debug, Clone, Default)]
pub struct WriteBuffer {
    bucket: String,
    ops: std::collections::BTreeMap<String, BufferedOp>,
    order: Vec<String>,
}

impl WriteBuffer {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ops: std::collections::BTreeMap::new(),
            order: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn touch(&mut self, key: &str) {
        if !self.order.iter().any(|k| k == key) {
            self.order.push(key.to_owned());
        }
    }

    /// Buffers a synthetic insert. A prior buffered insert for the same key
    /// (impossible in practice since keys are freshly generated per insert,
    /// but defensively handled) is simply replaced.
    pub fn buffer_insert(&mut self, key: &str, record: Record) -> Result<()> {
        self.touch(key);
        self.ops.insert(key.to_owned(), BufferedOp::Insert(record));
        Ok(())
    }

    /// Buffers an update, coalescing with any prior buffered op on this key
    /// per the table in the write-buffer design: a prior insert merges into
    /// one insert; a prior update keeps its original `expectedVersion` and
    /// `oldRecord` but adopts the new record; a prior delete is rejected.
    pub fn buffer_update(&mut self, key: &str, new_record: Record, expected_version: i64, old_record: Record) -> Result<()> {
        self.touch(key);
        match self.ops.remove(key) {
            Some(BufferedOp::Insert(_)) => {
                self.ops.insert(key.to_owned(), BufferedOp::Insert(new_record));
            }
            Some(BufferedOp::Update { expected_version: orig_version, old_record: orig_old, .. }) => {
                self.ops.insert(
                    key.to_owned(),
                    BufferedOp::Update {
                        new_record,
                        expected_version: orig_version,
                        old_record: orig_old,
                    },
                );
            }
            Some(BufferedOp::Delete { .. }) => {
                return Err(TxnError::deleted_key_reused(self.bucket.clone(), key));
            }
            None => {
                self.ops.insert(
                    key.to_owned(),
                    BufferedOp::Update {
                        new_record,
                        expected_version,
                        old_record,
                    },
                );
            }
        }
        Ok(())
    }

    /// Buffers a delete. A prior buffered insert cancels out to a no-op for
    /// this key (never sent to `commitBatch`); a prior update collapses to a
    /// delete carrying the original pre-buffer version; a prior delete is
    /// rejected (terminal).
    pub fn buffer_delete(&mut self, key: &str, expected_version: i64, old_record: Record) -> Result<()> {
        self.touch(key);
        match self.ops.remove(key) {
            Some(BufferedOp::Insert(_)) => {
                // insert+delete cancels out; leave the key unbuffered.
            }
            Some(BufferedOp::Update { expected_version: orig_version, old_record: orig_old, .. }) => {
                self.ops.insert(
                    key.to_owned(),
                    BufferedOp::Delete {
                        expected_version: orig_version,
                        old_record: orig_old,
                    },
                );
            }
            Some(BufferedOp::Delete { .. }) => {
                return Err(TxnError::deleted_key_reused(self.bucket.clone(), key));
            }
            None => {
                self.ops.insert(key.to_owned(), BufferedOp::Delete { expected_version, old_record });
            }
        }
        Ok(())
    }

    /// What this buffer has for `key`, independent of the live worker.
    pub fn overlay(&self, key: &str) -> Overlay {
        match self.ops.get(key) {
            Some(BufferedOp::Insert(r)) => Overlay::Buffered(r.clone()),
            Some(BufferedOp::Update { new_record, .. }) => Overlay::Buffered(new_record.clone()),
            Some(BufferedOp::Delete { .. }) => Overlay::Deleted,
            None => Overlay::NotBuffered,
        }
    }

    /// Every record currently buffered as an insert, for `all`/`where` overlay.
    pub fn buffered_inserts(&self) -> impl Iterator<Item = &Record> {
        self.ops.values().filter_map(|op| match op {
            BufferedOp::Insert(r) => Some(r),
            _ => None,
        })
    }

    pub fn is_deleted(&self, key: &str) -> bool {
        matches!(self.ops.get(key), Some(BufferedOp::Delete { .. }))
    }

    /// The ordered commit-batch ops for this bucket, in first-touch order.
    pub fn to_commit_ops(&self) -> Vec<CommitOp> {
        self.order
            .iter()
            .filter_map(|key| self.ops.get(key).map(|op| (key, op)))
            .map(|(key, op)| match op {
                BufferedOp::Insert(record) => CommitOp::Insert {
                    key: key.clone(),
                    record: record.clone(),
                },
                BufferedOp::Update { new_record, expected_version, .. } => CommitOp::Update {
                    key: key.clone(),
                    new_record: new_record.clone(),
                    expected_version: *expected_version,
                },
                BufferedOp::Delete { expected_version, .. } => CommitOp::Delete {
                    key: key.clone(),
                    expected_version: *expected_version,
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noex_core::Value;

    fn rec(version: i64) -> Record {
        let mut r = Record::new();
        r.insert("_version".into(), Value::Int(version));
        r
    }

    #[test]
    fn insert_then_update_coalesces_to_single_insert() {
        let mut buf = WriteBuffer::new("users");
        buf.buffer_insert("k1", rec(1)).unwrap();
        buf.buffer_update("k1", rec(2), 1, rec(1)).unwrap();

        let ops = buf.to_commit_ops();
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0], CommitOp::Insert { .. }));
    }

    #[test]
    fn insert_then_delete_cancels_out() {
        let mut buf = WriteBuffer::new("users");
        buf.buffer_insert("k1", rec(1)).unwrap();
        buf.buffer_delete("k1", 1, rec(1)).unwrap();

        assert!(buf.to_commit_ops().is_empty());
    }

    #[test]
    fn update_then_update_keeps_original_expected_version() {
        let mut buf = WriteBuffer::new("users");
        buf.buffer_update("k1", rec(2), 1, rec(1)).unwrap();
        buf.buffer_update("k1", rec(3), 2, rec(2)).unwrap();

        let ops = buf.to_commit_ops();
        match &ops[0] {
            CommitOp::Update { new_record, expected_version, .. } => {
                assert_eq!(*expected_version, 1);
                assert_eq!(new_record.get("_version"), Some(&Value::Int(3)));
            }
            _ => panic!("expected Update"),
        }
    }

    #[test]
    fn update_then_delete_collapses_with_original_version() {
        let mut buf = WriteBuffer::new("users");
        buf.buffer_update("k1", rec(2), 1, rec(1)).unwrap();
        buf.buffer_delete("k1", 2, rec(2)).unwrap();

        let ops = buf.to_commit_ops();
        match &ops[0] {
            CommitOp::Delete { expected_version, .. } => assert_eq!(*expected_version, 1),
            _ => panic!("expected Delete"),
        }
    }

    #[test]
    fn delete_then_any_op_is_rejected() {
        let mut buf = WriteBuffer::new("users");
        buf.buffer_delete("k1", 1, rec(1)).unwrap();
        let err = buf.buffer_update("k1", rec(2), 1, rec(1)).unwrap_err();
        assert!(matches!(err, TxnError::DeletedKeyReused { .. }));
    }
}
