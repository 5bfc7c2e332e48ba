//! noex-txn -- multi-bucket transactions: a per-bucket write buffer giving
//! read-your-own-writes inside a `transaction(...)` callback, and a
//! two-phase commit across every bucket the callback touched, with
//! undo-log rollback on failure.

mod buffer;
mod ctx;
mod error;

pub use buffer::{Overlay, WriteBuffer};
pub use ctx::{run, BucketProvider, TransactionContext, TxBucketHandle};
pub use error::{Result, TxnError};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use noex_bus::EventBus;
    use noex_core::{BucketDefinition, FieldDefinition, FieldType, Value};
    use noex_worker::{spawn_bucket, BucketHandle};

    struct TestStore {
        bus: EventBus,
        buckets: Mutex<BTreeMap<String, (BucketHandle, BucketDefinition)>>,
    }

    impl TestStore {
        fn new() -> Self {
            Self {
                bus: EventBus::new(),
                buckets: Mutex::new(BTreeMap::new()),
            }
        }

        fn define(&self, def: BucketDefinition) {
            let (handle, _join) = spawn_bucket(def.clone(), None, None, self.bus.clone());
            self.buckets.lock().unwrap().insert(def.name.clone(), (handle, def));
        }
    }

    impl BucketProvider for TestStore {
        fn bucket_handle(&self, name: &str) -> std::result::Result<BucketHandle, TxnError> {
            self.buckets
                .lock()
                .unwrap()
                .get(name)
                .map(|(h, _)| h.clone())
                .ok_or_else(|| TxnError::unknown_bucket(name))
        }

        fn bucket_definition(&self, name: &str) -> std::result::Result<BucketDefinition, TxnError> {
            self.buckets
                .lock()
                .unwrap()
                .get(name)
                .map(|(_, d)| d.clone())
                .ok_or_else(|| TxnError::unknown_bucket(name))
        }
    }

    fn accounts_def() -> BucketDefinition {
        BucketDefinition::new("accounts", "id")
            .field("id", FieldDefinition::new(FieldType::String).generated(noex_core::Generated::Uuid))
            .field("name", FieldDefinition::new(FieldType::String).required())
            .field("balance", FieldDefinition::new(FieldType::Number).required())
    }

    fn rec(pairs: &[(&str, Value)]) -> noex_core::Record {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn transfer_commits_both_updates_atomically() {
        let store = TestStore::new();
        store.define(accounts_def());

        let handle = store.bucket_handle("accounts").unwrap();
        let alice = handle
            .insert(rec(&[("name", Value::Str("alice".into())), ("balance", Value::Int(1000))]))
            .unwrap();
        let bob = handle
            .insert(rec(&[("name", Value::Str("bob".into())), ("balance", Value::Int(500))]))
            .unwrap();
        let alice_id = alice.get("id").unwrap().as_str().unwrap().to_owned();
        let bob_id = bob.get("id").unwrap().as_str().unwrap().to_owned();

        run(&store, &store.bus, |ctx| {
            let accounts = ctx.bucket("accounts")?;
            let a = accounts.get(&alice_id)?.unwrap();
            let b = accounts.get(&bob_id)?.unwrap();
            let a_balance = a.get("balance").unwrap().as_f64().unwrap();
            let b_balance = b.get("balance").unwrap().as_f64().unwrap();
            accounts.update(&alice_id, rec(&[("balance", Value::Float(a_balance - 200.0))]))?;
            accounts.update(&bob_id, rec(&[("balance", Value::Float(b_balance + 200.0))]))?;
            Ok(())
        })
        .unwrap();

        let alice_after = handle.get(&alice_id).unwrap().unwrap();
        let bob_after = handle.get(&bob_id).unwrap().unwrap();
        assert_eq!(alice_after.get("balance").unwrap().as_f64(), Some(800.0));
        assert_eq!(bob_after.get("balance").unwrap().as_f64(), Some(700.0));
    }

    #[test]
    fn optimistic_conflict_rolls_back_and_leaves_outside_update_intact() {
        let store = TestStore::new();
        store.define(accounts_def());
        let handle = store.bucket_handle("accounts").unwrap();
        let alice = handle
            .insert(rec(&[("name", Value::Str("alice".into())), ("balance", Value::Int(1000))]))
            .unwrap();
        let alice_id = alice.get("id").unwrap().as_str().unwrap().to_owned();

        let err = run(&store, &store.bus, |ctx| {
            let accounts = ctx.bucket("accounts")?;
            let a = accounts.get(&alice_id)?.unwrap();
            // An outside, non-transactional update lands between this read and the commit.
            handle.update(&alice_id, rec(&[("balance", Value::Int(1234))])).unwrap();
            let balance = a.get("balance").unwrap().as_f64().unwrap();
            accounts.update(&alice_id, rec(&[("balance", Value::Float(balance - 200.0))]))?;
            Ok(())
        })
        .unwrap_err();

        assert!(err.is_conflict());
        let final_record = handle.get(&alice_id).unwrap().unwrap();
        assert_eq!(final_record.get("balance"), Some(&Value::Int(1234)));
    }

    #[test]
    fn callback_error_discards_buffer_without_touching_worker() {
        let store = TestStore::new();
        store.define(accounts_def());
        let handle = store.bucket_handle("accounts").unwrap();
        let alice = handle
            .insert(rec(&[("name", Value::Str("alice".into())), ("balance", Value::Int(1000))]))
            .unwrap();
        let alice_id = alice.get("id").unwrap().as_str().unwrap().to_owned();

        let result: Result<()> = run(&store, &store.bus, |ctx| {
            let accounts = ctx.bucket("accounts")?;
            accounts.update(&alice_id, rec(&[("balance", Value::Int(1))]))?;
            Err(TxnError::Callback("user callback failed".into()))
        });

        assert!(result.is_err());
        let untouched = handle.get(&alice_id).unwrap().unwrap();
        assert_eq!(untouched.get("balance"), Some(&Value::Int(1000)));
    }

    #[test]
    fn read_your_own_writes_sees_buffered_insert_before_commit() {
        let store = TestStore::new();
        store.define(accounts_def());

        run(&store, &store.bus, |ctx| {
            let accounts = ctx.bucket("accounts")?;
            let inserted = accounts.insert(rec(&[("name", Value::Str("carol".into())), ("balance", Value::Int(50))]))?;
            let id = inserted.get("id").unwrap().as_str().unwrap().to_owned();
            let seen = accounts.get(&id)?;
            assert!(seen.is_some());
            Ok(())
        })
        .unwrap();
    }
}
