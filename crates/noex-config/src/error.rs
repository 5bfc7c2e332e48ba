//! Errors raised while building or loading a `StoreConfig` or a declarative
//! bucket document.

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config source: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] figment::Error),

    #[error("bucket {bucket:?} has no field named {key:?} for its declared primary key")]
    UnknownKeyField { bucket: String, key: String },

    #[error("bucket {bucket:?}: invalid ttl: {reason}")]
    InvalidTtl { bucket: String, reason: String },

    #[error("bucket {bucket:?}: maxSize must be greater than zero, got {value}")]
    InvalidMaxSize { bucket: String, value: i64 },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

impl ConfigError {
    pub fn unknown_key_field(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::UnknownKeyField { bucket: bucket.into(), key: key.into() }
    }

    pub fn invalid_ttl(bucket: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTtl { bucket: bucket.into(), reason: reason.into() }
    }

    pub fn invalid_max_size(bucket: impl Into<String>, value: i64) -> Self {
        Self::InvalidMaxSize { bucket: bucket.into(), value }
    }
}
