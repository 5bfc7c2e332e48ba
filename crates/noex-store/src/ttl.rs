//! TTL scheduler: a chained one-shot timer that sweeps every registered
//! bucket for expired records. Only buckets with a declared TTL are
//! registered; a bucket with no TTL never enters the sweep.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use noex_core::record::now_ms;
use noex_worker::BucketHandle;

enum Command {
    Register(String, BucketHandle),
    Deregister(String),
    PurgeNow(Sender<usize>),
    Stop,
}

/// Owns a dedicated sweep thread. `recv_timeout` doubles as the chained
/// one-shot timer: the next sleep only starts once the current sweep (and
/// any pending command) has been handled, so ticks never overlap.
pub struct TtlScheduler {
    tx: Sender<Command>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TtlScheduler {
    pub fn new(check_interval_ms: u64) -> Self {
        let (tx, rx) = mpsc::channel::<Command>();
        let interval = Duration::from_millis(check_interval_ms.max(1));

        let join = std::thread::Builder::new()
            .name("noex-ttl-scheduler".into())
            .spawn(move || {
                let mut buckets: BTreeMap<String, BucketHandle> = BTreeMap::new();
                loop {
                    match rx.recv_timeout(interval) {
                        Ok(Command::Register(name, handle)) => {
                            buckets.insert(name, handle);
                        }
                        Ok(Command::Deregister(name)) => {
                            buckets.remove(&name);
                        }
                        Ok(Command::PurgeNow(reply)) => {
                            let removed = sweep(&buckets);
                            let _ = reply.send(removed);
                        }
                        Ok(Command::Stop) => break,
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            sweep(&buckets);
                        }
                        Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .expect("failed to spawn ttl scheduler thread");

        Self {
            tx,
            handle: Mutex::new(Some(join)),
        }
    }

    pub fn register(&self, bucket: &str, handle: BucketHandle) {
        let _ = self.tx.send(Command::Register(bucket.to_owned(), handle));
    }

    pub fn deregister(&self, bucket: &str) {
        let _ = self.tx.send(Command::Deregister(bucket.to_owned()));
    }

    /// Runs one sweep cycle immediately and returns the total number of
    /// records removed across every registered bucket.
    pub fn purge(&self) -> usize {
        let (reply_tx, reply_rx) = mpsc::channel();
        if self.tx.send(Command::PurgeNow(reply_tx)).is_err() {
            return 0;
        }
        reply_rx.recv().unwrap_or(0)
    }

    /// Cancels the pending timer and stops the sweep thread. Idempotent.
    pub fn stop(&self) {
        let mut guard = self.handle.lock().unwrap();
        if let Some(join) = guard.take() {
            let _ = self.tx.send(Command::Stop);
            let _ = join.join();
        }
    }
}

impl Drop for TtlScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sweep(buckets: &BTreeMap<String, BucketHandle>) -> usize {
    let now = now_ms();
    let mut total = 0;
    for (name, handle) in buckets {
        match handle.purge_expired(now) {
            Ok(n) => total += n,
            Err(e) => tracing::warn!(bucket = %name, error = %e, "ttl sweep failed for bucket"),
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use noex_bus::EventBus;
    use noex_core::{BucketDefinition, FieldDefinition, FieldType, Generated, Value};
    use noex_worker::spawn_bucket;

    fn ttl_def() -> BucketDefinition {
        BucketDefinition::new("sessions", "id")
            .field("id", FieldDefinition::new(FieldType::String).generated(Generated::Uuid))
            .field("data", FieldDefinition::new(FieldType::String))
            .ttl(1_i64)
    }

    #[test]
    fn purge_now_removes_expired_records() {
        let bus = EventBus::new();
        let (handle, _join) = spawn_bucket(ttl_def(), Some(1), None, bus);
        handle.insert([("data".to_owned(), Value::Str("x".into()))].into_iter().collect()).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let scheduler = TtlScheduler::new(50_000);
        scheduler.register("sessions", handle.clone());
        let removed = scheduler.purge();
        assert_eq!(removed, 1);
        assert_eq!(handle.count(None).unwrap(), 0);
        scheduler.stop();
    }

    #[test]
    fn deregistered_bucket_is_not_swept() {
        let bus = EventBus::new();
        let (handle, _join) = spawn_bucket(ttl_def(), Some(1), None, bus);
        handle.insert([("data".to_owned(), Value::Str("x".into()))].into_iter().collect()).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let scheduler = TtlScheduler::new(50_000);
        scheduler.register("sessions", handle.clone());
        scheduler.deregister("sessions");
        let removed = scheduler.purge();
        assert_eq!(removed, 0);
        assert_eq!(handle.count(None).unwrap(), 1);
        scheduler.stop();
    }
}
