//! Errors a transaction can raise.

use noex_core::ValidationError;
use noex_worker::WorkerError;

/// Everything that can go wrong inside a `transaction(...)` callback or its
/// commit.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TxnError {
    #[error("unknown bucket: {0}")]
    UnknownBucket(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("deleted key {key} cannot be written again in the same transaction (bucket {bucket})")]
    DeletedKeyReused { bucket: String, key: String },

    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// The user's callback returned an error; the buffer was discarded
    /// without touching any worker.
    #[error("{0}")]
    Callback(String),
}

pub type Result<T> = std::result::Result<T, TxnError>;

impl TxnError {
    pub fn unknown_bucket(name: impl Into<String>) -> Self {
        Self::UnknownBucket(name.into())
    }

    pub fn deleted_key_reused(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::DeletedKeyReused {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// `true` for an optimistic-lock failure surfaced from a bucket's
    /// `commitBatch`, the one conflict class worth retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Worker(e) if e.is_conflict())
    }
}
