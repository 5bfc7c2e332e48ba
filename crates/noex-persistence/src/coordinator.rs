//! Dirty-tracking, debounced flush coordinator sitting between the event
//! bus and a [`StorageAdapter`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use noex_bus::EventBus;
use noex_worker::BucketHandle;

use crate::adapter::{PersistedBlob, PersistedState, StorageAdapter};
use crate::error::{PersistenceError, Result};

type ErrorHook = Arc<dyn Fn(PersistenceError) + Send + Sync>;

struct Inner {
    store_name: String,
    server_id: String,
    adapter: Arc<dyn StorageAdapter>,
    debounce: Duration,
    buckets: Mutex<BTreeMap<String, BucketHandle>>,
    dirty: Mutex<BTreeSet<String>>,
    timer_armed: Mutex<bool>,
    on_error: Mutex<Option<ErrorHook>>,
    stopped: Mutex<bool>,
}

impl Inner {
    fn key_for(&self, bucket: &str) -> String {
        format!("{}:bucket:{}", self.store_name, bucket)
    }

    fn report(&self, err: PersistenceError) {
        tracing::warn!(error = %err, "persistence operation failed for a bucket");
        if let Some(hook) = self.on_error.lock().unwrap().as_ref() {
            hook(err);
        }
    }

    fn mark_dirty(self: &Arc<Self>, bucket: &str) {
        if *self.stopped.lock().unwrap() {
            return;
        }
        self.dirty.lock().unwrap().insert(bucket.to_owned());
        self.arm_timer();
    }

    /// Arms a single shared debounce timer, if one isn't already pending.
    /// Events that land while it's armed just extend the dirty set; they
    /// don't reset the clock.
    fn arm_timer(self: &Arc<Self>) {
        let mut armed = self.timer_armed.lock().unwrap();
        if *armed {
            return;
        }
        *armed = true;
        drop(armed);

        let inner = Arc::clone(self);
        std::thread::spawn(move || {
            std::thread::sleep(inner.debounce);
            *inner.timer_armed.lock().unwrap() = false;
            inner.flush_dirty();
        });
    }

    fn flush_dirty(&self) {
        let pending: Vec<String> = {
            let mut dirty = self.dirty.lock().unwrap();
            let pending: Vec<String> = dirty.iter().cloned().collect();
            dirty.clear();
            pending
        };
        for bucket in pending {
            self.flush_one(&bucket);
        }
    }

    fn flush_one(&self, bucket: &str) {
        let handle = match self.buckets.lock().unwrap().get(bucket).cloned() {
            Some(h) => h,
            None => return,
        };
        let snapshot = match handle.snapshot() {
            Ok(s) => s,
            Err(e) => {
                self.report(PersistenceError::save(self.key_for(bucket), e.to_string()));
                return;
            }
        };
        let blob = PersistedBlob::new(PersistedState::from(snapshot), self.server_id.clone());
        if let Err(e) = self.adapter.save(&self.key_for(bucket), &blob) {
            self.report(e);
        }
    }
}

/// Tracks which registered buckets have mutated since their last save and
/// flushes them to a [`StorageAdapter`] on a shared debounce timer.
///
/// Subscribes to `bucket.*.*` on construction; every event for a registered
/// bucket marks it dirty. A bucket not yet registered is ignored.
#[derive(Clone)]
pub struct PersistenceCoordinator {
    inner: Arc<Inner>,
    bus: EventBus,
    subscription: Arc<noex_bus::Unsubscribe>,
}

impl PersistenceCoordinator {
    pub fn new(
        store_name: impl Into<String>,
        server_id: impl Into<String>,
        adapter: Arc<dyn StorageAdapter>,
        debounce_ms: u64,
        bus: EventBus,
    ) -> Self {
        let inner = Arc::new(Inner {
            store_name: store_name.into(),
            server_id: server_id.into(),
            adapter,
            debounce: Duration::from_millis(debounce_ms),
            buckets: Mutex::new(BTreeMap::new()),
            dirty: Mutex::new(BTreeSet::new()),
            timer_armed: Mutex::new(false),
            on_error: Mutex::new(None),
            stopped: Mutex::new(false),
        });

        let for_sub = Arc::clone(&inner);
        let subscription = bus.subscribe("bucket.*.*", move |event| {
            if for_sub.buckets.lock().unwrap().contains_key(&event.bucket) {
                for_sub.mark_dirty(&event.bucket);
            }
        });

        Self {
            inner,
            bus,
            subscription: Arc::new(subscription),
        }
    }

    pub fn on_error<F>(&self, hook: F)
    where
        F: Fn(PersistenceError) + Send + Sync + 'static,
    {
        *self.inner.on_error.lock().unwrap() = Some(Arc::new(hook));
    }

    /// Loads any previously persisted state for `bucket`, for use as the
    /// seed a caller passes to `spawn_bucket` before registering the live
    /// handle. An adapter error is reported through `on_error` (if set) in
    /// addition to being returned, the same as a failed flush.
    pub fn load(&self, bucket: &str) -> Result<Option<PersistedState>> {
        let key = self.inner.key_for(bucket);
        match self.inner.adapter.load(&key) {
            Ok(blob) => Ok(blob.map(|blob| blob.state)),
            Err(e) => {
                let reason = e.to_string();
                self.inner.report(e);
                Err(PersistenceError::load(key, reason))
            }
        }
    }

    /// Registers a live bucket handle so its mutations get tracked and
    /// flushed. Call after `spawn_bucket`, once the handle exists.
    pub fn register(&self, bucket: &str, handle: BucketHandle) {
        self.inner.buckets.lock().unwrap().insert(bucket.to_owned(), handle);
    }

    /// Drops a bucket from dirty tracking; its last saved state is left on
    /// disk (the caller decides whether dropping a bucket should also erase
    /// its persisted blob).
    pub fn deregister(&self, bucket: &str) {
        self.inner.buckets.lock().unwrap().remove(bucket);
        self.inner.dirty.lock().unwrap().remove(bucket);
    }

    /// Flushes every currently dirty bucket immediately, without waiting
    /// for the debounce timer.
    pub fn flush(&self) {
        self.inner.flush_dirty();
    }

    /// Marks every registered bucket dirty and flushes, then unsubscribes
    /// from the bus and closes the adapter. Must run before the buckets'
    /// worker threads are torn down.
    pub fn shutdown(&self) {
        *self.inner.stopped.lock().unwrap() = true;
        {
            let buckets = self.inner.buckets.lock().unwrap();
            let mut dirty = self.inner.dirty.lock().unwrap();
            for name in buckets.keys() {
                dirty.insert(name.clone());
            }
        }
        self.inner.flush_dirty();
        self.subscription.unsubscribe();
        self.bus.flush();
        if let Err(e) = self.inner.adapter.close() {
            self.inner.report(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::InMemoryAdapter;
    use noex_core::{BucketDefinition, FieldDefinition, FieldType, Generated, Value};
    use noex_worker::spawn_bucket;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn users_def() -> BucketDefinition {
        BucketDefinition::new("users", "id")
            .field("id", FieldDefinition::new(FieldType::String).generated(Generated::Uuid))
            .field("name", FieldDefinition::new(FieldType::String).required())
    }

    fn rec(pairs: &[(&str, Value)]) -> noex_core::Record {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn explicit_flush_persists_dirty_bucket() {
        let bus = EventBus::new();
        let (handle, _join) = spawn_bucket(users_def(), None, None, bus.clone());
        let adapter = Arc::new(InMemoryAdapter::new());
        let coordinator = PersistenceCoordinator::new("demo", "server-1", adapter.clone(), 50, bus.clone());
        coordinator.register("users", handle.clone());

        handle.insert(rec(&[("name", Value::Str("ann".into()))])).unwrap();
        bus.flush();
        coordinator.flush();

        let loaded = coordinator.load("users").unwrap().unwrap();
        assert_eq!(loaded.records.len(), 1);
    }

    #[test]
    fn unregistered_bucket_events_are_ignored() {
        let bus = EventBus::new();
        let (handle, _join) = spawn_bucket(users_def(), None, None, bus.clone());
        let adapter = Arc::new(InMemoryAdapter::new());
        let coordinator = PersistenceCoordinator::new("demo", "server-1", adapter, 50, bus.clone());

        handle.insert(rec(&[("name", Value::Str("bo".into()))])).unwrap();
        bus.flush();
        coordinator.flush();

        assert!(coordinator.load("users").unwrap().is_none());
    }

    #[test]
    fn load_failure_invokes_on_error_hook() {
        struct FailingAdapter;
        impl StorageAdapter for FailingAdapter {
            fn save(&self, _key: &str, _blob: &PersistedBlob) -> Result<()> {
                Ok(())
            }
            fn load(&self, key: &str) -> Result<Option<PersistedBlob>> {
                Err(PersistenceError::load(key, "disk unavailable"))
            }
        }

        let bus = EventBus::new();
        let adapter = Arc::new(FailingAdapter);
        let coordinator = PersistenceCoordinator::new("demo", "server-1", adapter, 50, bus);

        let errors = Arc::new(AtomicUsize::new(0));
        let e = errors.clone();
        coordinator.on_error(move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });

        let result = coordinator.load("users");
        assert!(result.is_err());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_flushes_and_reports_no_error() {
        let bus = EventBus::new();
        let (handle, _join) = spawn_bucket(users_def(), None, None, bus.clone());
        let adapter = Arc::new(InMemoryAdapter::new());
        let coordinator = PersistenceCoordinator::new("demo", "server-1", adapter, 50, bus.clone());
        coordinator.register("users", handle.clone());

        let errors = Arc::new(AtomicUsize::new(0));
        let e = errors.clone();
        coordinator.on_error(move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });

        handle.insert(rec(&[("name", Value::Str("cy".into()))])).unwrap();
        bus.flush();
        coordinator.shutdown();

        assert_eq!(errors.load(Ordering::SeqCst), 0);
        assert!(coordinator.load("users").unwrap().is_some());
    }
}
