//! Index Manager: per-bucket secondary and unique indexes, with a two-phase
//! validate-then-apply protocol so a single record violating multiple
//! constraints can never leave an index partially updated.

use std::collections::{BTreeMap, BTreeSet};

use noex_core::{BucketDefinition, Record};

pub use noex_core::Value;

/// Raised by [`IndexManager::validate_insert`] / [`validate_update`] when a
/// unique-indexed field would collide with an existing record.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unique constraint violated on bucket {bucket}, field {field}: value {value:?} already in use")]
pub struct UniqueConstraintError {
    pub bucket: String,
    pub field: String,
    pub value: Value,
}

/// Maintains one bucket's secondary indexes. Configured once from the
/// bucket's [`BucketDefinition`] and then kept in lockstep with the record
/// map by the bucket worker: `validate_*` is called before a mutation is
/// applied, `add_record`/`remove_record`/`update_record` after.
#[derive(Debug, Default)]
pub struct IndexManager {
    bucket: String,
    /// field -> (value -> the one key holding it)
    unique: BTreeMap<String, BTreeMap<Value, String>>,
    /// field -> (value -> set of keys holding it)
    secondary: BTreeMap<String, BTreeMap<Value, BTreeSet<String>>>,
}

impl IndexManager {
    /// Builds empty indexes from the bucket's declared unique and secondary
    /// index fields. `unique: true` on a field implies a unique index even
    /// when the field is not also listed in `indexes`.
    pub fn from_definition(def: &BucketDefinition) -> Self {
        let mut unique = BTreeMap::new();
        for field in def.unique_fields() {
            unique.insert(field.to_owned(), BTreeMap::new());
        }
        let mut secondary = BTreeMap::new();
        for field in def.secondary_index_fields() {
            secondary.insert(field.to_owned(), BTreeMap::new());
        }
        Self {
            bucket: def.name.clone(),
            unique,
            secondary,
        }
    }

    pub fn is_indexed(&self, field: &str) -> bool {
        self.unique.contains_key(field) || self.secondary.contains_key(field)
    }

    pub fn is_unique(&self, field: &str) -> bool {
        self.unique.contains_key(field)
    }

    fn indexable(record: &Record, field: &str) -> Option<&Value> {
        match record.get(field) {
            None => None,
            Some(Value::Null) => None,
            Some(v) => Some(v),
        }
    }

    /// Pure: does not mutate. Fails on the first unique index (in the
    /// bucket's declared field order) whose value already maps to a
    /// different key.
    pub fn validate_insert(&self, record: &Record) -> Result<(), UniqueConstraintError> {
        for (field, map) in &self.unique {
            let Some(value) = Self::indexable(record, field) else {
                continue;
            };
            if map.contains_key(value) {
                return Err(UniqueConstraintError {
                    bucket: self.bucket.clone(),
                    field: field.clone(),
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }

    /// Pure: only unique fields whose value actually changed are checked,
    /// and only against keys other than `key` itself.
    pub fn validate_update(
        &self,
        key: &str,
        old: &Record,
        new: &Record,
    ) -> Result<(), UniqueConstraintError> {
        for (field, map) in &self.unique {
            let old_value = Self::indexable(old, field);
            let new_value = Self::indexable(new, field);
            if old_value == new_value {
                continue;
            }
            let Some(value) = new_value else { continue };
            if let Some(holder) = map.get(value) {
                if holder != key {
                    return Err(UniqueConstraintError {
                        bucket: self.bucket.clone(),
                        field: field.clone(),
                        value: value.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Applies an insert; caller must have already run `validate_insert`.
    pub fn add_record(&mut self, key: &str, record: &Record) {
        for (field, map) in &mut self.unique {
            if let Some(value) = Self::indexable(record, field) {
                map.insert(value.clone(), key.to_owned());
            }
        }
        for (field, map) in &mut self.secondary {
            if let Some(value) = Self::indexable(record, field) {
                map.entry(value.clone()).or_default().insert(key.to_owned());
            }
        }
    }

    /// Applies a removal; caller must ensure `record` is the currently
    /// indexed record for `key`.
    pub fn remove_record(&mut self, key: &str, record: &Record) {
        for (field, map) in &mut self.unique {
            if let Some(value) = Self::indexable(record, field) {
                if map.get(value).map(String::as_str) == Some(key) {
                    map.remove(value);
                }
            }
        }
        for (field, map) in &mut self.secondary {
            if let Some(value) = Self::indexable(record, field) {
                if let Some(keys) = map.get_mut(value) {
                    keys.remove(key);
                    if keys.is_empty() {
                        map.remove(value);
                    }
                }
            }
        }
    }

    /// Applies an update; caller must have already run `validate_update`.
    pub fn update_record(&mut self, key: &str, old: &Record, new: &Record) {
        self.remove_record(key, old);
        self.add_record(key, new);
    }

    /// Keys indexed under `field == value`. Empty for an unindexed field or
    /// a value never seen.
    pub fn find_by_index(&self, field: &str, value: &Value) -> Vec<String> {
        if let Some(map) = self.unique.get(field) {
            return map.get(value).cloned().into_iter().collect();
        }
        if let Some(map) = self.secondary.get(field) {
            return map
                .get(value)
                .map(|keys| keys.iter().cloned().collect())
                .unwrap_or_default();
        }
        Vec::new()
    }

    /// Drops every index entry, for `clear`.
    pub fn clear(&mut self) {
        for map in self.unique.values_mut() {
            map.clear();
        }
        for map in self.secondary.values_mut() {
            map.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noex_core::{FieldDefinition, FieldType};

    fn def() -> BucketDefinition {
        BucketDefinition::new("users", "id")
            .field("id", FieldDefinition::new(FieldType::String))
            .field("email", FieldDefinition::new(FieldType::String).unique())
            .field("team", FieldDefinition::new(FieldType::String))
            .index("team")
    }

    fn rec(id: &str, email: &str, team: &str) -> Record {
        let mut r = Record::new();
        r.insert("id".into(), Value::Str(id.into()));
        r.insert("email".into(), Value::Str(email.into()));
        r.insert("team".into(), Value::Str(team.into()));
        r
    }

    #[test]
    fn unique_insert_rejects_duplicate() {
        let mut idx = IndexManager::from_definition(&def());
        let a = rec("1", "a@x", "red");
        idx.validate_insert(&a).unwrap();
        idx.add_record("1", &a);

        let b = rec("2", "a@x", "blue");
        assert!(idx.validate_insert(&b).is_err());
    }

    #[test]
    fn secondary_index_groups_by_value() {
        let mut idx = IndexManager::from_definition(&def());
        let a = rec("1", "a@x", "red");
        let b = rec("2", "b@x", "red");
        idx.add_record("1", &a);
        idx.add_record("2", &b);

        let mut keys = idx.find_by_index("team", &Value::Str("red".into()));
        keys.sort();
        assert_eq!(keys, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn update_changing_unique_field_checked_against_others_only() {
        let mut idx = IndexManager::from_definition(&def());
        let a = rec("1", "a@x", "red");
        idx.add_record("1", &a);

        // Updating the same record's own value is fine.
        let a2 = rec("1", "a2@x", "red");
        idx.validate_update("1", &a, &a2).unwrap();
        idx.update_record("1", &a, &a2);

        let b = rec("2", "b@x", "blue");
        idx.add_record("2", &b);
        let b2 = rec("2", "a2@x", "blue");
        assert!(idx.validate_update("2", &b, &b2).is_err());
    }

    #[test]
    fn null_values_are_not_indexed() {
        let mut idx = IndexManager::from_definition(&def());
        let mut a = rec("1", "a@x", "red");
        a.insert("email".into(), Value::Null);
        idx.validate_insert(&a).unwrap();
        idx.add_record("1", &a);

        let mut b = rec("2", "b@x", "blue");
        b.insert("email".into(), Value::Null);
        assert!(idx.validate_insert(&b).is_ok());
    }

    #[test]
    fn remove_then_reinsert_same_value_succeeds() {
        let mut idx = IndexManager::from_definition(&def());
        let a = rec("1", "a@x", "red");
        idx.add_record("1", &a);
        idx.remove_record("1", &a);
        assert!(idx.validate_insert(&a).is_ok());
    }
}
