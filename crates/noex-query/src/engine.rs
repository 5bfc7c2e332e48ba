//! The reactive query engine: a registry of named query functions, an
//! invalidation index keyed by bucket and by (bucket, key), and
//! re-evaluation driven off the event bus.
//!
//! Re-evaluation runs inline inside the event bus's own dispatch callback,
//! so `settle()` is just `bus.flush()` -- the bus already guarantees every
//! event enqueued before the flush has finished dispatching, and dispatch
//! *is* re-evaluation here. This mirrors the bus's own single-dispatch-thread
//! design rather than standing up a second actor for the same job.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use noex_bus::EventBus;
use noex_core::Value;

use crate::error::{QueryError, Result};
use crate::proxy::{BucketSource, Dependencies, QueryCtx};

pub type QueryFn = Arc<dyn Fn(&QueryCtx<'_>, &Value) -> Result<Value> + Send + Sync>;
type SubCallback = Arc<dyn Fn(&Value) + Send + Sync>;

struct Subscription {
    name: String,
    params: Value,
    last_result: Value,
    callback: SubCallback,
}

struct Inner {
    source: Arc<dyn BucketSource>,
    bus: EventBus,
    registry: Mutex<BTreeMap<String, QueryFn>>,
    subs: Mutex<BTreeMap<u64, Subscription>>,
    bucket_index: Mutex<BTreeMap<String, BTreeSet<u64>>>,
    record_index: Mutex<BTreeMap<(String, String), BTreeSet<u64>>>,
    next_id: AtomicU64,
}

/// Cheap to clone (`Arc`-backed); every clone shares the same registry,
/// subscriptions, and invalidation index.
#[derive(Clone)]
pub struct QueryEngine {
    inner: Arc<Inner>,
}

/// Returned by [`QueryEngine::subscribe`]. Dropping it does not unsubscribe;
/// call `unsubscribe()` explicitly, which is idempotent.
pub struct QuerySubscription {
    engine: QueryEngine,
    id: u64,
}

impl QuerySubscription {
    pub fn unsubscribe(&self) {
        self.engine.unsubscribe(self.id);
    }
}

impl QueryEngine {
    pub fn new(source: Arc<dyn BucketSource>, bus: EventBus) -> Self {
        let inner = Arc::new(Inner {
            source,
            bus: bus.clone(),
            registry: Mutex::new(BTreeMap::new()),
            subs: Mutex::new(BTreeMap::new()),
            bucket_index: Mutex::new(BTreeMap::new()),
            record_index: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        });

        let engine = QueryEngine { inner };
        let for_sub = engine.clone();
        bus.subscribe("bucket.*.*", move |event| {
            for_sub.handle_event(&event.bucket, &event.key);
        });
        engine
    }

    pub fn define<F>(&self, name: impl Into<String>, f: F) -> Result<()>
    where
        F: Fn(&QueryCtx<'_>, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        let mut registry = self.inner.registry.lock().unwrap();
        if registry.contains_key(&name) {
            return Err(QueryError::already_defined(name));
        }
        registry.insert(name, Arc::new(f));
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<QueryFn> {
        self.inner
            .registry
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::not_found(name))
    }

    /// Evaluates once with no dependency bookkeeping or subscription.
    pub fn run_query(&self, name: &str, params: Value) -> Result<Value> {
        let f = self.lookup(name)?;
        let ctx = QueryCtx::new(self.inner.source.as_ref());
        f(&ctx, &params)
    }

    /// Performs an initial evaluation, registers the subscription's
    /// dependencies in the invalidation index, and returns an idempotent
    /// unsubscribe handle. `callback` is never invoked for this initial
    /// result -- only on a later re-evaluation that differs from it.
    pub fn subscribe<F>(&self, name: &str, params: Value, callback: F) -> Result<QuerySubscription>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let f = self.lookup(name)?;
        let ctx = QueryCtx::new(self.inner.source.as_ref());
        let result = f(&ctx, &params)?;
        let deps = ctx.into_dependencies();

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.register_deps(id, &deps);
        self.inner.subs.lock().unwrap().insert(
            id,
            Subscription {
                name: name.to_owned(),
                params,
                last_result: result,
                callback: Arc::new(callback),
            },
        );

        Ok(QuerySubscription { engine: self.clone(), id })
    }

    fn unsubscribe(&self, id: u64) {
        self.inner.subs.lock().unwrap().remove(&id);
        self.remove_from_index(id);
    }

    /// Blocks until every event enqueued on the bus before this call has
    /// been dispatched (and therefore, transitively, every re-evaluation it
    /// triggered has completed). Test-only but publicly available.
    pub fn settle(&self) {
        self.inner.bus.flush();
    }

    fn register_deps(&self, id: u64, deps: &Dependencies) {
        let mut bucket_index = self.inner.bucket_index.lock().unwrap();
        for bucket in &deps.bucket_level {
            bucket_index.entry(bucket.clone()).or_default().insert(id);
        }
        drop(bucket_index);
        let mut record_index = self.inner.record_index.lock().unwrap();
        for key in &deps.record_level {
            record_index.entry(key.clone()).or_default().insert(id);
        }
    }

    fn remove_from_index(&self, id: u64) {
        let mut bucket_index = self.inner.bucket_index.lock().unwrap();
        bucket_index.retain(|_, ids| {
            ids.remove(&id);
            !ids.is_empty()
        });
        drop(bucket_index);
        let mut record_index = self.inner.record_index.lock().unwrap();
        record_index.retain(|_, ids| {
            ids.remove(&id);
            !ids.is_empty()
        });
    }

    fn handle_event(&self, bucket: &str, key: &str) {
        let affected: BTreeSet<u64> = {
            let bucket_index = self.inner.bucket_index.lock().unwrap();
            let record_index = self.inner.record_index.lock().unwrap();
            let mut ids: BTreeSet<u64> = bucket_index.get(bucket).cloned().unwrap_or_default();
            if let Some(set) = record_index.get(&(bucket.to_owned(), key.to_owned())) {
                ids.extend(set.iter().copied());
            }
            ids
        };
        for id in affected {
            self.reevaluate(id);
        }
    }

    /// (1) clear the subscription's old index entries, (2) re-run its query
    /// function capturing fresh dependencies, (3) register the new
    /// dependencies, (4) invoke the callback only if the result changed. A
    /// failing evaluation is logged and skipped, leaving `last_result`
    /// unchanged; the next invalidating event retries.
    fn reevaluate(&self, id: u64) {
        let Some((name, params)) = self
            .inner
            .subs
            .lock()
            .unwrap()
            .get(&id)
            .map(|sub| (sub.name.clone(), sub.params.clone()))
        else {
            return;
        };

        let Ok(f) = self.lookup(&name) else { return };
        let ctx = QueryCtx::new(self.inner.source.as_ref());
        let result = match f(&ctx, &params) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(query = %name, error = %e, "query re-evaluation failed, retaining last result");
                return;
            }
        };
        let deps = ctx.into_dependencies();
        self.remove_from_index(id);
        self.register_deps(id, &deps);

        let mut subs = self.inner.subs.lock().unwrap();
        let Some(sub) = subs.get_mut(&id) else { return };
        if sub.last_result == result {
            return;
        }
        sub.last_result = result.clone();
        let callback = sub.callback.clone();
        drop(subs);
        callback(&result);
    }
}
