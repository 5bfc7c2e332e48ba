//! noex-core -- the value model, schema definitions, and schema validator
//! shared by every other crate in the store.

pub mod bucket_def;
pub mod error;
pub mod field;
pub mod formats;
pub mod idgen;
pub mod record;
pub mod validation;
pub mod value;

pub use bucket_def::{BucketDefinition, TtlInput};
pub use error::{Issue, IssueCode, ValidationError};
pub use field::{DefaultValue, FieldDefinition, FieldType, Format, Generated};
pub use idgen::AutoIncrementCounter;
pub use record::{Record, RecordMeta};
pub use validation::SchemaValidator;
pub use value::Value;
