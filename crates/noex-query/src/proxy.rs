//! The query context and its dependency-tracking, read-only bucket proxy.

use std::cell::RefCell;
use std::collections::BTreeSet;

use noex_core::Record;
use noex_worker::{BucketHandle, Filter};

use crate::error::Result;

/// What the query engine needs to resolve a bucket name into a live handle,
/// independent of the store crate.
pub trait BucketSource: Send + Sync {
    fn bucket_handle(&self, name: &str) -> Result<BucketHandle>;
}

/// Dependencies recorded by one query evaluation. A bucket-level dependency
/// subsumes any record-level dependency already recorded for that bucket.
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    pub bucket_level: BTreeSet<String>,
    pub record_level: BTreeSet<(String, String)>,
}

impl Dependencies {
    fn record_bucket(&mut self, bucket: &str) {
        self.record_level.retain(|(b, _)| b != bucket);
        self.bucket_level.insert(bucket.to_owned());
    }

    fn record_key(&mut self, bucket: &str, key: &str) {
        if self.bucket_level.contains(bucket) {
            return;
        }
        self.record_level.insert((bucket.to_owned(), key.to_owned()));
    }
}

/// Passed to a registered query function. Every read through
/// `ctx.bucket(name)` records a dependency used by the invalidation index;
/// accessing the proxy without reading anything records nothing.
pub struct QueryCtx<'a> {
    source: &'a dyn BucketSource,
    deps: RefCell<Dependencies>,
}

impl<'a> QueryCtx<'a> {
    pub fn new(source: &'a dyn BucketSource) -> Self {
        Self {
            source,
            deps: RefCell::new(Dependencies::default()),
        }
    }

    pub fn bucket<'b>(&'b self, name: &str) -> Result<ReadProxy<'b, 'a>> {
        let handle = self.source.bucket_handle(name)?;
        Ok(ReadProxy {
            ctx: self,
            name: name.to_owned(),
            handle,
        })
    }

    pub fn into_dependencies(self) -> Dependencies {
        self.deps.into_inner()
    }
}

/// A read-only view of one bucket, scoped to a single query evaluation.
pub struct ReadProxy<'b, 'a> {
    ctx: &'b QueryCtx<'a>,
    name: String,
    handle: BucketHandle,
}

impl<'b, 'a> ReadProxy<'b, 'a> {
    pub fn get(&self, key: &str) -> Result<Option<Record>> {
        self.ctx.deps.borrow_mut().record_key(&self.name, key);
        Ok(self.handle.get(key)?)
    }

    fn touch_bucket(&self) {
        self.ctx.deps.borrow_mut().record_bucket(&self.name);
    }

    pub fn all(&self) -> Result<Vec<Record>> {
        self.touch_bucket();
        Ok(self.handle.all()?)
    }

    pub fn where_(&self, filter: Filter) -> Result<Vec<Record>> {
        self.touch_bucket();
        Ok(self.handle.where_(filter)?)
    }

    pub fn find_one(&self, filter: Filter) -> Result<Option<Record>> {
        self.touch_bucket();
        Ok(self.handle.find_one(filter)?)
    }

    pub fn count(&self, filter: Option<Filter>) -> Result<usize> {
        self.touch_bucket();
        Ok(self.handle.count(filter)?)
    }

    pub fn first(&self, n: usize) -> Result<Vec<Record>> {
        self.touch_bucket();
        Ok(self.handle.first(n)?)
    }

    pub fn last(&self, n: usize) -> Result<Vec<Record>> {
        self.touch_bucket();
        Ok(self.handle.last(n)?)
    }

    pub fn paginate(&self, after: Option<String>, limit: usize) -> Result<Vec<Record>> {
        self.touch_bucket();
        Ok(self.handle.paginate(after, limit)?)
    }

    pub fn sum(&self, field: &str, filter: Option<Filter>) -> Result<f64> {
        self.touch_bucket();
        Ok(self.handle.sum(field, filter)?)
    }

    pub fn avg(&self, field: &str, filter: Option<Filter>) -> Result<f64> {
        self.touch_bucket();
        Ok(self.handle.avg(field, filter)?)
    }

    pub fn min(&self, field: &str, filter: Option<Filter>) -> Result<Option<f64>> {
        self.touch_bucket();
        Ok(self.handle.min(field, filter)?)
    }

    pub fn max(&self, field: &str, filter: Option<Filter>) -> Result<Option<f64>> {
        self.touch_bucket();
        Ok(self.handle.max(field, filter)?)
    }
}
