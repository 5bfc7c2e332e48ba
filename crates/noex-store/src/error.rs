//! The facade's own error type, wrapping every component error it can
//! surface.

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("bucket {0:?} is already defined")]
    AlreadyDefined(String),

    #[error("bucket {0:?} is not defined")]
    UnknownBucket(String),

    #[error(transparent)]
    Config(#[from] noex_config::ConfigError),

    #[error(transparent)]
    Worker(#[from] noex_worker::WorkerError),

    #[error(transparent)]
    Txn(#[from] noex_txn::TxnError),

    #[error(transparent)]
    Query(#[from] noex_query::QueryError),

    #[error(transparent)]
    Persistence(#[from] noex_persistence::PersistenceError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn already_defined(name: impl Into<String>) -> Self {
        Self::AlreadyDefined(name.into())
    }

    pub fn unknown_bucket(name: impl Into<String>) -> Self {
        Self::UnknownBucket(name.into())
    }
}
