//! Process-wide pub/sub event bus. Topics are strictly three dot-separated
//! segments: `bucket.<bucketName>.<eventType>`. A pattern's `*` matches
//! exactly one segment; there is no recursive wildcard.
//!
//! `publish` is synchronous with respect to the caller -- the event is
//! handed to the dispatcher and the call returns -- but subscriber callbacks
//! run on a dedicated dispatch thread after the publishing call has already
//! returned. Because the dispatcher drains one `mpsc::Receiver` in order,
//! events stay totally ordered per key and per bucket, matching §5 of the
//! spec without needing a lock held across any callback.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use noex_core::Record;

/// The three event types a bucket worker publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Inserted,
    Updated,
    Deleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Inserted => "inserted",
            EventType::Updated => "updated",
            EventType::Deleted => "deleted",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record-level mutation event. `old` is absent for `inserted`, `new` is
/// absent for `deleted`.
#[derive(Debug, Clone)]
pub struct Event {
    pub bucket: String,
    pub key: String,
    pub event_type: EventType,
    pub old: Option<Record>,
    pub new: Option<Record>,
}

impl Event {
    pub fn inserted(bucket: impl Into<String>, key: impl Into<String>, record: Record) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            event_type: EventType::Inserted,
            old: None,
            new: Some(record),
        }
    }

    pub fn updated(bucket: impl Into<String>, key: impl Into<String>, old: Record, new: Record) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            event_type: EventType::Updated,
            old: Some(old),
            new: Some(new),
        }
    }

    pub fn deleted(bucket: impl Into<String>, key: impl Into<String>, record: Record) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            event_type: EventType::Deleted,
            old: Some(record),
            new: None,
        }
    }

    /// `bucket.<bucketName>.<eventType>`, the canonical topic this event
    /// publishes on.
    pub fn topic(&self) -> String {
        format!("bucket.{}.{}", self.bucket, self.event_type)
    }
}

/// Matches a subscription pattern against a concrete topic. Both must have
/// exactly three dot-separated segments; `*` in the pattern matches any
/// single segment verbatim, everything else is a case-sensitive literal.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let pat_segs: Vec<&str> = pattern.split('.').collect();
    let top_segs: Vec<&str> = topic.split('.').collect();
    if pat_segs.len() != 3 || top_segs.len() != 3 {
        return false;
    }
    pat_segs
        .iter()
        .zip(top_segs.iter())
        .all(|(p, t)| *p == "*" || p == t)
}

type Callback = Box<dyn Fn(&Event) + Send + Sync>;

struct Subscription {
    id: u64,
    pattern: String,
    callback: Callback,
}

enum Command {
    Publish(Event),
    Subscribe(Subscription),
    Unsubscribe(u64),
    /// Test/shutdown synchronization: replies once every command enqueued
    /// before this one has been processed.
    Barrier(Sender<()>),
}

/// A process-wide, serialized event bus. Cheap to clone (`Arc`-backed);
/// every clone shares the same dispatcher thread and subscriber registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

struct Inner {
    tx: Sender<Command>,
    next_id: AtomicU64,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Handle returned by [`EventBus::subscribe`]. Dropping it does not
/// unsubscribe; call `unsubscribe()` explicitly, which is idempotent.
pub struct Unsubscribe {
    bus: EventBus,
    id: u64,
}

impl Unsubscribe {
    pub fn unsubscribe(&self) {
        self.bus.unsubscribe(self.id);
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<Command>();
        let handle = std::thread::Builder::new()
            .name("noex-event-bus".into())
            .spawn(move || {
                let mut subs: BTreeMap<u64, Subscription> = BTreeMap::new();
                for cmd in rx {
                    match cmd {
                        Command::Publish(event) => {
                            let topic = event.topic();
                            for sub in subs.values() {
                                if topic_matches(&sub.pattern, &topic) {
                                    (sub.callback)(&event);
                                }
                            }
                        }
                        Command::Subscribe(sub) => {
                            subs.insert(sub.id, sub);
                        }
                        Command::Unsubscribe(id) => {
                            subs.remove(&id);
                        }
                        Command::Barrier(reply) => {
                            let _ = reply.send(());
                        }
                    }
                }
            })
            .expect("failed to spawn event bus dispatcher thread");

        Self {
            inner: Arc::new(Inner {
                tx,
                next_id: AtomicU64::new(1),
                handle: Mutex::new(Some(handle)),
            }),
        }
    }

    /// Registers `callback` for every topic matching `pattern`. Returns an
    /// idempotent unsubscribe handle.
    pub fn subscribe<F>(&self, pattern: impl Into<String>, callback: F) -> Unsubscribe
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let pattern = pattern.into();
        let _ = self.inner.tx.send(Command::Subscribe(Subscription {
            id,
            pattern,
            callback: Box::new(callback),
        }));
        Unsubscribe {
            bus: self.clone(),
            id,
        }
    }

    fn unsubscribe(&self, id: u64) {
        let _ = self.inner.tx.send(Command::Unsubscribe(id));
    }

    /// Hands `event` to the dispatcher and returns immediately; subscriber
    /// callbacks run on the dispatch thread after this call has returned.
    pub fn publish(&self, event: Event) {
        let _ = self.inner.tx.send(Command::Publish(event));
    }

    /// Publishes a contiguous, already-ordered block of events (used by the
    /// transaction context once every participating bucket has committed).
    pub fn publish_all(&self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.publish(event);
        }
    }

    /// Blocks until every event/subscribe/unsubscribe enqueued before this
    /// call has been fully dispatched. Used by tests and by shutdown paths
    /// that need delivery to have settled.
    pub fn flush(&self) {
        let (tx, rx) = mpsc::channel();
        let _ = self.inner.tx.send(Command::Barrier(tx));
        let _ = rx.recv();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn rec() -> Record {
        Record::new()
    }

    #[test]
    fn wildcard_matches_single_segment_only() {
        assert!(topic_matches("bucket.*.inserted", "bucket.users.inserted"));
        assert!(!topic_matches("bucket.*.inserted", "bucket.users.updated"));
        assert!(!topic_matches("bucket.*.*.extra", "bucket.users.inserted.extra"));
        assert!(topic_matches("*.*.*", "bucket.users.inserted"));
    }

    #[test]
    fn subscriber_receives_matching_events_only() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let _sub = bus.subscribe("bucket.users.*", move |_e| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Event::inserted("users", "1", rec()));
        bus.publish(Event::inserted("orders", "1", rec()));
        bus.flush();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent_and_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = bus.subscribe("bucket.users.*", move |_e| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Event::inserted("users", "1", rec()));
        sub.unsubscribe();
        sub.unsubscribe();
        bus.publish(Event::inserted("users", "2", rec()));
        bus.flush();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn events_are_observed_in_publish_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = bus.subscribe("bucket.users.*", move |e| {
            s.lock().unwrap().push(e.event_type);
        });

        bus.publish(Event::inserted("users", "1", rec()));
        bus.publish(Event::updated("users", "1", rec(), rec()));
        bus.publish(Event::deleted("users", "1", rec()));
        bus.flush();

        let observed = seen.lock().unwrap();
        assert_eq!(
            *observed,
            vec![EventType::Inserted, EventType::Updated, EventType::Deleted]
        );
    }
}
