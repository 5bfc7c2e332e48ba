//! Errors the query engine can raise.

use noex_worker::WorkerError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum QueryError {
    #[error("query already defined: {0}")]
    AlreadyDefined(String),

    #[error("no query registered with name: {0}")]
    NotFound(String),

    #[error("unknown bucket: {0}")]
    UnknownBucket(String),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

pub type Result<T> = std::result::Result<T, QueryError>;

impl QueryError {
    pub fn already_defined(name: impl Into<String>) -> Self {
        Self::AlreadyDefined(name.into())
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    pub fn unknown_bucket(name: impl Into<String>) -> Self {
        Self::UnknownBucket(name.into())
    }
}
