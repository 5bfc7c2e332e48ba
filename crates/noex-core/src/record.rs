//! Records and their reserved metadata fields.

use std::collections::BTreeMap;

use crate::value::Value;

/// A record is a field-name -> value map plus four reserved metadata fields
/// that live in the same map under a `_`-prefixed name.
///
/// Using `BTreeMap` rather than a hash map gives key-sorted iteration for
/// free, which is what ordered-set buckets need for `first`/`last`/
/// `paginate`/`all`.
pub type Record = BTreeMap<String, Value>;

pub const FIELD_VERSION: &str = "_version";
pub const FIELD_CREATED_AT: &str = "_createdAt";
pub const FIELD_UPDATED_AT: &str = "_updatedAt";
pub const FIELD_EXPIRES_AT: &str = "_expiresAt";

/// All reserved metadata field names, in the order they should be considered
/// when sanitizing update payloads.
pub const RESERVED_FIELDS: [&str; 4] = [
    FIELD_VERSION,
    FIELD_CREATED_AT,
    FIELD_UPDATED_AT,
    FIELD_EXPIRES_AT,
];

pub fn is_reserved_field(name: &str) -> bool {
    RESERVED_FIELDS.contains(&name)
}

/// Typed accessors for the reserved fields, since every component that reads
/// them (eviction ordering, TTL purge, optimistic-lock checks) needs a
/// consistent, panicking-free view.
pub trait RecordMeta {
    fn meta_version(&self) -> i64;
    fn meta_created_at(&self) -> i64;
    fn meta_updated_at(&self) -> i64;
    fn meta_expires_at(&self) -> Option<i64>;

    fn set_meta_version(&mut self, v: i64);
    fn set_meta_created_at(&mut self, v: i64);
    fn set_meta_updated_at(&mut self, v: i64);
    fn set_meta_expires_at(&mut self, v: Option<i64>);
}

impl RecordMeta for Record {
    fn meta_version(&self) -> i64 {
        self.get(FIELD_VERSION).and_then(Value::as_f64).unwrap_or(1.0) as i64
    }

    fn meta_created_at(&self) -> i64 {
        self.get(FIELD_CREATED_AT).and_then(Value::as_f64).unwrap_or(0.0) as i64
    }

    fn meta_updated_at(&self) -> i64 {
        self.get(FIELD_UPDATED_AT).and_then(Value::as_f64).unwrap_or(0.0) as i64
    }

    fn meta_expires_at(&self) -> Option<i64> {
        match self.get(FIELD_EXPIRES_AT) {
            Some(Value::Int(i)) => Some(*i),
            Some(Value::Float(f)) => Some(*f as i64),
            _ => None,
        }
    }

    fn set_meta_version(&mut self, v: i64) {
        self.insert(FIELD_VERSION.to_owned(), Value::Int(v));
    }

    fn set_meta_created_at(&mut self, v: i64) {
        self.insert(FIELD_CREATED_AT.to_owned(), Value::Int(v));
    }

    fn set_meta_updated_at(&mut self, v: i64) {
        self.insert(FIELD_UPDATED_AT.to_owned(), Value::Int(v));
    }

    fn set_meta_expires_at(&mut self, v: Option<i64>) {
        match v {
            Some(ms) => {
                self.insert(FIELD_EXPIRES_AT.to_owned(), Value::Int(ms));
            }
            None => {
                self.remove(FIELD_EXPIRES_AT);
            }
        }
    }
}

/// Current epoch milliseconds, the single clock source used for
/// `_createdAt`/`_updatedAt`/`_expiresAt` and the `timestamp`/`cuid` generators.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_fields_are_recognized() {
        assert!(is_reserved_field("_version"));
        assert!(!is_reserved_field("name"));
    }

    #[test]
    fn meta_round_trips() {
        let mut r = Record::new();
        r.set_meta_version(3);
        r.set_meta_created_at(1000);
        r.set_meta_updated_at(2000);
        r.set_meta_expires_at(Some(5000));
        assert_eq!(r.meta_version(), 3);
        assert_eq!(r.meta_created_at(), 1000);
        assert_eq!(r.meta_updated_at(), 2000);
        assert_eq!(r.meta_expires_at(), Some(5000));
    }
}
