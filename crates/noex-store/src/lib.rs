//! noex-store -- the embeddable façade. Owns the bucket registry, the event
//! bus, the query engine, the TTL scheduler, and an optional persistence
//! coordinator, and wires them together the way [`define_bucket`] and
//! [`transaction`] need.
//!
//! [`define_bucket`]: Store::define_bucket
//! [`transaction`]: Store::transaction

mod error;
mod ttl;

pub use error::{Result, StoreError};
pub use ttl::TtlScheduler;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use noex_bus::EventBus;
use noex_config::StoreConfig;
use noex_core::{BucketDefinition, Record};
use noex_persistence::{PersistenceCoordinator, PersistenceError};
use noex_query::{BucketSource, QueryCtx, QueryEngine, QuerySubscription};
use noex_txn::{BucketProvider, TransactionContext};
use noex_worker::{spawn_bucket, BucketHandle};

#[derive(Clone)]
struct BucketEntry {
    handle: BucketHandle,
    def: BucketDefinition,
}

struct Inner {
    config: StoreConfig,
    bus: EventBus,
    buckets: Mutex<BTreeMap<String, BucketEntry>>,
    ttl: TtlScheduler,
    persistence: Option<PersistenceCoordinator>,
    query: Mutex<Option<QueryEngine>>,
}

impl Inner {
    fn lookup(&self, name: &str) -> Result<BucketEntry> {
        self.buckets
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::unknown_bucket(name))
    }
}

impl BucketSource for Inner {
    fn bucket_handle(&self, name: &str) -> noex_query::Result<BucketHandle> {
        self.lookup(name).map(|e| e.handle).map_err(|_| noex_query::QueryError::unknown_bucket(name))
    }
}

impl BucketProvider for Inner {
    fn bucket_handle(&self, name: &str) -> std::result::Result<BucketHandle, noex_txn::TxnError> {
        self.lookup(name).map(|e| e.handle).map_err(|_| noex_txn::TxnError::unknown_bucket(name))
    }

    fn bucket_definition(&self, name: &str) -> std::result::Result<BucketDefinition, noex_txn::TxnError> {
        self.lookup(name).map(|e| e.def).map_err(|_| noex_txn::TxnError::unknown_bucket(name))
    }
}

/// The embeddable, in-memory record store. Cheap to clone; every clone
/// shares the same bucket registry, bus, and background actors.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    pub fn new(config: StoreConfig) -> Self {
        let bus = EventBus::new();
        let ttl = TtlScheduler::new(config.ttl_check_interval_ms);
        let persistence = config.adapter.clone().map(|adapter| {
            PersistenceCoordinator::new(config.name.clone(), config.server_id.clone(), adapter, config.debounce_ms, bus.clone())
        });

        let inner = Arc::new(Inner {
            config,
            bus: bus.clone(),
            buckets: Mutex::new(BTreeMap::new()),
            ttl,
            persistence,
            query: Mutex::new(None),
        });

        let source: Arc<dyn BucketSource> = Arc::clone(&inner) as Arc<dyn BucketSource>;
        let engine = QueryEngine::new(source, bus);
        *inner.query.lock().unwrap() = Some(engine);

        Self { inner }
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn query_engine(&self) -> QueryEngine {
        self.inner.query.lock().unwrap().clone().expect("query engine initialized in Store::new")
    }

    /// Registers a hook invoked whenever the persistence coordinator fails
    /// to save or load a bucket's state. A no-op on a store with no
    /// configured adapter.
    pub fn on_error<F>(&self, hook: F)
    where
        F: Fn(PersistenceError) + Send + Sync + 'static,
    {
        if let Some(coordinator) = &self.inner.persistence {
            coordinator.on_error(hook);
        }
    }

    /// Registers `def`, optionally seeding it from a persisted snapshot,
    /// spawns its worker, and wires it into the TTL scheduler and
    /// persistence coordinator as configured. Returns a handle to the new
    /// bucket.
    pub fn define_bucket(&self, def: BucketDefinition) -> Result<BucketHandle> {
        let name = def.name.clone();
        if self.inner.buckets.lock().unwrap().contains_key(&name) {
            return Err(StoreError::already_defined(name));
        }

        let ttl_ms = match &def.ttl {
            Some(ttl) => Some(noex_timeparsing::parse_ttl(ttl).map_err(|e| {
                noex_config::ConfigError::invalid_ttl(&name, e.to_string())
            })?),
            None => None,
        };

        let is_persistent = def.persistent.unwrap_or(self.inner.persistence.is_some());
        let seed = if is_persistent {
            match &self.inner.persistence {
                // Any load failure is already reported through the coordinator's
                // on_error hook (see PersistenceCoordinator::load); here we just
                // fall back to an empty seed rather than fail the whole define.
                Some(coordinator) => coordinator.load(&name).ok().flatten().map(Into::into),
                None => None,
            }
        } else {
            None
        };

        let (handle, _join) = spawn_bucket(def.clone(), ttl_ms, seed, self.inner.bus.clone());

        self.inner.buckets.lock().unwrap().insert(name.clone(), BucketEntry { handle: handle.clone(), def });

        if ttl_ms.is_some() {
            self.inner.ttl.register(&name, handle.clone());
        }
        if is_persistent {
            if let Some(coordinator) = &self.inner.persistence {
                coordinator.register(&name, handle.clone());
            }
        }

        Ok(handle)
    }

    /// Deregisters `name` from TTL and persistence tracking, stops its
    /// worker thread via `Request::Stop`, and erases its definition. Any
    /// `BucketHandle` clone a caller kept from `define_bucket` becomes
    /// unusable immediately after this returns, not just once it's dropped.
    pub fn drop_bucket(&self, name: &str) -> Result<()> {
        self.inner.ttl.deregister(name);
        if let Some(coordinator) = &self.inner.persistence {
            coordinator.deregister(name);
        }
        let entry = self.inner.buckets.lock().unwrap().remove(name).ok_or_else(|| StoreError::unknown_bucket(name))?;
        let _ = entry.handle.stop();
        Ok(())
    }

    pub fn bucket_handle(&self, name: &str) -> Result<BucketHandle> {
        self.inner.lookup(name).map(|e| e.handle)
    }

    pub fn bucket_definition(&self, name: &str) -> Result<BucketDefinition> {
        self.inner.lookup(name).map(|e| e.def)
    }

    /// Runs `callback` inside a multi-bucket transaction: every read/write
    /// through the `TxBucketHandle`s it obtains from `ctx.bucket(name)` is
    /// buffered until every touched bucket validates and commits, or rolled
    /// back atomically on the first failure.
    pub fn transaction<T>(&self, callback: impl FnOnce(&TransactionContext<'_>) -> noex_txn::Result<T>) -> noex_txn::Result<T> {
        noex_txn::run(self.inner.as_ref(), &self.inner.bus, callback)
    }

    /// Registers a named, dependency-tracked query function.
    pub fn define_query(&self, name: impl Into<String>, f: impl Fn(&QueryCtx<'_>, &noex_core::Value) -> noex_query::Result<noex_core::Value> + Send + Sync + 'static) -> noex_query::Result<()> {
        self.query_engine().define(name, f)
    }

    pub fn run_query(&self, name: &str, params: noex_core::Value) -> noex_query::Result<noex_core::Value> {
        self.query_engine().run_query(name, params)
    }

    pub fn subscribe(
        &self,
        name: &str,
        params: noex_core::Value,
        callback: impl Fn(&noex_core::Value) + Send + Sync + 'static,
    ) -> noex_query::Result<QuerySubscription> {
        self.query_engine().subscribe(name, params, callback)
    }

    /// Runs one TTL sweep across every registered bucket immediately and
    /// returns the total number of records removed.
    pub fn purge_expired(&self) -> usize {
        self.inner.ttl.purge()
    }

    /// Flushes any dirty persisted buckets immediately. A no-op store with
    /// no configured adapter does nothing.
    pub fn flush(&self) {
        if let Some(coordinator) = &self.inner.persistence {
            coordinator.flush();
        }
    }

    /// Stops the TTL scheduler, flushes and closes persistence, then lets
    /// every bucket worker's channel drop -- in that order, so workers are
    /// still alive when the final flush runs.
    pub fn shutdown(&self) {
        self.inner.ttl.stop();
        if let Some(coordinator) = &self.inner.persistence {
            coordinator.shutdown();
        }
        self.inner.buckets.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noex_core::{FieldDefinition, FieldType, Generated, Value};
    use noex_persistence::InMemoryAdapter;

    fn users_def() -> BucketDefinition {
        BucketDefinition::new("users", "id")
            .field("id", FieldDefinition::new(FieldType::String).generated(Generated::Uuid))
            .field("name", FieldDefinition::new(FieldType::String).required())
            .field("balance", FieldDefinition::new(FieldType::Number).with_default(Value::Int(0)))
    }

    fn rec(pairs: &[(&str, Value)]) -> Record {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn define_bucket_then_insert_and_get() {
        let store = Store::new(StoreConfig::new("demo"));
        let handle = store.define_bucket(users_def()).unwrap();
        let r = handle.insert(rec(&[("name", Value::Str("ann".into()))])).unwrap();
        let id = r.get("id").unwrap().as_str().unwrap().to_owned();
        assert_eq!(store.bucket_handle("users").unwrap().get(&id).unwrap(), Some(r));
    }

    #[test]
    fn redefining_same_bucket_is_rejected() {
        let store = Store::new(StoreConfig::new("demo"));
        store.define_bucket(users_def()).unwrap();
        let err = store.define_bucket(users_def()).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyDefined(_)));
    }

    #[test]
    fn transaction_moves_balance_between_two_records() {
        let store = Store::new(StoreConfig::new("demo"));
        let handle = store.define_bucket(users_def()).unwrap();
        let a = handle.insert(rec(&[("name", Value::Str("a".into())), ("balance", Value::Int(100))])).unwrap();
        let b = handle.insert(rec(&[("name", Value::Str("b".into())), ("balance", Value::Int(0))])).unwrap();
        let a_id = a.get("id").unwrap().as_str().unwrap().to_owned();
        let b_id = b.get("id").unwrap().as_str().unwrap().to_owned();

        store
            .transaction(|ctx| {
                let users = ctx.bucket("users")?;
                users.update(&a_id, rec(&[("balance", Value::Int(70))]))?;
                users.update(&b_id, rec(&[("balance", Value::Int(30))]))?;
                Ok(())
            })
            .unwrap();

        assert_eq!(handle.get(&a_id).unwrap().unwrap().get("balance"), Some(&Value::Int(70)));
        assert_eq!(handle.get(&b_id).unwrap().unwrap().get("balance"), Some(&Value::Int(30)));
    }

    #[test]
    fn define_query_and_run_it() {
        let store = Store::new(StoreConfig::new("demo"));
        let handle = store.define_bucket(users_def()).unwrap();
        handle.insert(rec(&[("name", Value::Str("a".into())), ("balance", Value::Int(5))])).unwrap();

        store
            .define_query("total_balance", |ctx, _params| {
                let users = ctx.bucket("users")?;
                let sum = users.sum("balance", None)?;
                Ok(Value::Float(sum))
            })
            .unwrap();

        let result = store.run_query("total_balance", Value::Null).unwrap();
        assert_eq!(result, Value::Float(5.0));
    }

    #[test]
    fn persistent_bucket_round_trips_through_store_restart() {
        let adapter: Arc<dyn noex_persistence::StorageAdapter> = Arc::new(InMemoryAdapter::new());
        let config = StoreConfig::new("demo").adapter(adapter.clone());

        let store = Store::new(config.clone());
        let handle = store.define_bucket(users_def().persistent(true)).unwrap();
        handle.insert(rec(&[("name", Value::Str("ann".into()))])).unwrap();
        store.bus().flush();
        store.flush();
        store.shutdown();

        let store2 = Store::new(config);
        let handle2 = store2.define_bucket(users_def().persistent(true)).unwrap();
        assert_eq!(handle2.count(None).unwrap(), 1);
    }

    #[test]
    fn drop_bucket_removes_it_from_the_registry() {
        let store = Store::new(StoreConfig::new("demo"));
        store.define_bucket(users_def()).unwrap();
        store.drop_bucket("users").unwrap();
        assert!(matches!(store.bucket_handle("users").unwrap_err(), StoreError::UnknownBucket(_)));
    }

    #[test]
    fn drop_bucket_stops_the_worker_even_for_a_held_handle() {
        let store = Store::new(StoreConfig::new("demo"));
        let handle = store.define_bucket(users_def()).unwrap();
        store.drop_bucket("users").unwrap();
        assert!(handle.insert(rec(&[("name", Value::Str("late".into()))])).is_err());
    }
}
