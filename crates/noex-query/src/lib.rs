//! noex-query -- the reactive query engine: named, dependency-tracked query
//! functions, a two-level (bucket and record) invalidation index, and
//! deep-equality change detection driving subscriber callbacks.

mod engine;
mod error;
mod proxy;

pub use engine::{QueryEngine, QueryFn, QuerySubscription};
pub use error::{QueryError, Result};
pub use proxy::{BucketSource, Dependencies, QueryCtx, ReadProxy};
