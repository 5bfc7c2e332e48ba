//! Errors a storage adapter or the persistence coordinator can raise.

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("bucket {bucket} not registered with the persistence coordinator")]
    NotRegistered { bucket: String },

    #[error("adapter save failed for key {key}: {reason}")]
    Save { key: String, reason: String },

    #[error("adapter load failed for key {key}: {reason}")]
    Load { key: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

impl PersistenceError {
    pub fn not_registered(bucket: impl Into<String>) -> Self {
        Self::NotRegistered { bucket: bucket.into() }
    }

    pub fn save(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Save {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn load(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Load {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
