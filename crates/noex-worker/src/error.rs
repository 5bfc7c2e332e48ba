//! Errors a bucket worker can raise.

use noex_core::ValidationError;
use noex_index::UniqueConstraintError;

/// Everything that can go wrong talking to one bucket.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Unique(#[from] UniqueConstraintError),

    #[error("record not found in bucket {bucket}: {key}")]
    RecordNotFound { bucket: String, key: String },

    #[error("transaction conflict on bucket {bucket}, key {key}{}", detail.as_ref().map(|d| format!(": {d}")).unwrap_or_default())]
    TransactionConflict {
        bucket: String,
        key: String,
        detail: Option<String>,
    },

    #[error("bucket worker for {bucket} is stopping or stopped")]
    WorkerClosed { bucket: String },
}

pub type Result<T> = std::result::Result<T, WorkerError>;

impl WorkerError {
    pub fn record_not_found(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::RecordNotFound {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn conflict(bucket: impl Into<String>, key: impl Into<String>, detail: Option<String>) -> Self {
        Self::TransactionConflict {
            bucket: bucket.into(),
            key: key.into(),
            detail,
        }
    }

    pub fn closed(bucket: impl Into<String>) -> Self {
        Self::WorkerClosed {
            bucket: bucket.into(),
        }
    }

    /// `true` for an optimistic-lock failure at commit, the one conflict
    /// class a transactional caller might sensibly retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::TransactionConflict { .. })
    }
}
