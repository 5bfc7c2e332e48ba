//! Bucket definitions: the declarative schema + policy for one bucket.

use std::collections::BTreeMap;

use crate::field::FieldDefinition;

/// A still-unparsed TTL value as supplied by the caller. Parsing against the
/// duration grammar (§6 of the spec) happens at bucket registration time, in
/// `noex-timeparsing`, so a malformed value is rejected before any worker
/// starts rather than silently ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum TtlInput {
    /// A literal millisecond count.
    Millis(i64),
    /// A human string like `"5m"`, `"1.5h"`.
    Human(String),
}

impl From<i64> for TtlInput {
    fn from(ms: i64) -> Self {
        TtlInput::Millis(ms)
    }
}

impl From<&str> for TtlInput {
    fn from(s: &str) -> Self {
        TtlInput::Human(s.to_owned())
    }
}

impl From<String> for TtlInput {
    fn from(s: String) -> Self {
        TtlInput::Human(s)
    }
}

/// The declaration of one bucket: its primary key, schema, secondary
/// indexes, and lifecycle policy.
#[derive(Debug, Clone)]
pub struct BucketDefinition {
    pub name: String,
    /// Name of the primary-key field; must appear in `schema`.
    pub key: String,
    pub schema: BTreeMap<String, FieldDefinition>,
    /// Field names that should get a secondary index. A field marked
    /// `unique` gets an automatic unique index without needing to be listed
    /// here.
    pub indexes: Vec<String>,
    pub ttl: Option<TtlInput>,
    pub max_size: Option<usize>,
    /// `None` means "default to the store's persistence setting".
    pub persistent: Option<bool>,
}

impl BucketDefinition {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            schema: BTreeMap::new(),
            indexes: Vec::new(),
            ttl: None,
            max_size: None,
            persistent: None,
        }
    }

    pub fn field(mut self, name: impl Into<String>, def: FieldDefinition) -> Self {
        self.schema.insert(name.into(), def);
        self
    }

    pub fn index(mut self, field: impl Into<String>) -> Self {
        self.indexes.push(field.into());
        self
    }

    pub fn ttl(mut self, ttl: impl Into<TtlInput>) -> Self {
        self.ttl = Some(ttl.into());
        self
    }

    pub fn max_size(mut self, n: usize) -> Self {
        self.max_size = Some(n);
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = Some(persistent);
        self
    }

    /// Every field name that should get a unique index: those in `indexes`
    /// marked unique, plus any schema field marked `unique` regardless of
    /// whether it is listed in `indexes`.
    pub fn unique_fields(&self) -> Vec<&str> {
        self.schema
            .iter()
            .filter(|(_, def)| def.unique)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Non-unique secondary index fields: those listed in `indexes` that are
    /// not themselves unique (a unique field never gets a redundant
    /// non-unique index).
    pub fn secondary_index_fields(&self) -> Vec<&str> {
        self.indexes
            .iter()
            .map(String::as_str)
            .filter(|name| !self.schema.get(*name).map(|d| d.unique).unwrap_or(false))
            .collect()
    }
}
