//! Declarative (YAML/TOML) bucket definitions. The raw shape mirrors
//! [`noex_core::BucketDefinition`]/[`noex_core::FieldDefinition`] field for
//! field, but stays plain-data (`serde`-deserializable) since the real
//! types carry a non-serializable `Producer` default variant.

use std::collections::BTreeMap;

use noex_core::{BucketDefinition, FieldDefinition, FieldType, Format, Generated, TtlInput, Value};
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct RawFieldDef {
    #[serde(rename = "type")]
    pub field_type: Option<FieldType>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub generated: Option<Generated>,
    #[serde(rename = "enum", default)]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default)]
    pub format: Option<Format>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(rename = "minLength", default)]
    pub min_length: Option<usize>,
    #[serde(rename = "maxLength", default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(rename = "ref", default)]
    pub ref_bucket: Option<String>,
}

impl From<RawFieldDef> for FieldDefinition {
    fn from(raw: RawFieldDef) -> Self {
        FieldDefinition {
            field_type: raw.field_type,
            required: raw.required,
            default: raw.default.map(Into::into),
            generated: raw.generated,
            enum_values: raw.enum_values,
            format: raw.format,
            min: raw.min,
            max: raw.max,
            min_length: raw.min_length,
            max_length: raw.max_length,
            pattern: raw.pattern,
            unique: raw.unique,
            ref_bucket: raw.ref_bucket,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawTtl {
    Millis(i64),
    Human(String),
}

impl From<RawTtl> for TtlInput {
    fn from(raw: RawTtl) -> Self {
        match raw {
            RawTtl::Millis(ms) => TtlInput::Millis(ms),
            RawTtl::Human(s) => TtlInput::Human(s),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBucketDef {
    pub key: String,
    #[serde(default)]
    pub schema: BTreeMap<String, RawFieldDef>,
    #[serde(default)]
    pub indexes: Vec<String>,
    #[serde(default)]
    pub ttl: Option<RawTtl>,
    #[serde(rename = "maxSize", default)]
    pub max_size: Option<i64>,
    #[serde(default)]
    pub persistent: Option<bool>,
}

/// The top-level declarative document: a map of bucket name to definition.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBucketsDocument {
    #[serde(default)]
    pub buckets: BTreeMap<String, RawBucketDef>,
}

/// Converts a parsed declarative definition into a [`BucketDefinition`],
/// validating the same invariants a programmatic definition must satisfy:
/// the key field exists in the schema, the TTL grammar parses, and
/// `maxSize` is positive.
pub fn build_bucket_definition(name: &str, raw: RawBucketDef) -> Result<BucketDefinition> {
    if !raw.schema.contains_key(&raw.key) {
        return Err(ConfigError::unknown_key_field(name, raw.key));
    }

    let mut def = BucketDefinition::new(name, raw.key);
    for (field_name, field) in raw.schema {
        def = def.field(field_name, field.into());
    }
    for index in raw.indexes {
        def = def.index(index);
    }
    if let Some(max_size) = raw.max_size {
        if max_size <= 0 {
            return Err(ConfigError::invalid_max_size(name, max_size));
        }
        def = def.max_size(max_size as usize);
    }
    if let Some(persistent) = raw.persistent {
        def = def.persistent(persistent);
    }
    if let Some(ttl) = raw.ttl {
        let ttl: TtlInput = ttl.into();
        noex_timeparsing::parse_ttl(&ttl).map_err(|e| ConfigError::invalid_ttl(name, e.to_string()))?;
        def = def.ttl(ttl);
    }

    Ok(def)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_key_not_present_in_schema() {
        let raw = RawBucketDef {
            key: "id".to_owned(),
            schema: BTreeMap::new(),
            indexes: Vec::new(),
            ttl: None,
            max_size: None,
            persistent: None,
        };
        let err = build_bucket_definition("users", raw).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKeyField { .. }));
    }

    #[test]
    fn rejects_non_positive_max_size() {
        let mut schema = BTreeMap::new();
        schema.insert("id".to_owned(), RawFieldDef {
            field_type: Some(FieldType::String),
            required: false,
            default: None,
            generated: None,
            enum_values: None,
            format: None,
            min: None,
            max: None,
            min_length: None,
            max_length: None,
            pattern: None,
            unique: false,
            ref_bucket: None,
        });
        let raw = RawBucketDef {
            key: "id".to_owned(),
            schema,
            indexes: Vec::new(),
            ttl: None,
            max_size: Some(0),
            persistent: None,
        };
        let err = build_bucket_definition("sessions", raw).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMaxSize { .. }));
    }

    #[test]
    fn rejects_malformed_ttl_string() {
        let mut schema = BTreeMap::new();
        schema.insert("id".to_owned(), RawFieldDef {
            field_type: Some(FieldType::String),
            required: false,
            default: None,
            generated: None,
            enum_values: None,
            format: None,
            min: None,
            max: None,
            min_length: None,
            max_length: None,
            pattern: None,
            unique: false,
            ref_bucket: None,
        });
        let raw = RawBucketDef {
            key: "id".to_owned(),
            schema,
            indexes: Vec::new(),
            ttl: Some(RawTtl::Human("soon".to_owned())),
            max_size: None,
            persistent: None,
        };
        let err = build_bucket_definition("sessions", raw).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTtl { .. }));
    }
}
