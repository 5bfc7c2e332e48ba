//! noex-config -- `StoreConfig` plus declarative (YAML/TOML) bucket
//! definitions, validated the same way a programmatic definition is.

mod error;
mod loader;
mod raw;
mod store_config;

pub use error::{ConfigError, Result};
pub use loader::{load_buckets_toml, load_buckets_yaml};
pub use raw::{build_bucket_definition, RawBucketDef, RawBucketsDocument, RawFieldDef, RawTtl};
pub use store_config::StoreConfig;
