//! Loads declarative bucket definitions from a YAML or TOML document.

use std::collections::BTreeMap;
use std::path::Path;

use figment::providers::{Format, Toml, Yaml};
use figment::Figment;
use noex_core::BucketDefinition;

use crate::raw::{build_bucket_definition, RawBucketsDocument};
use crate::Result;

/// Loads a `buckets:` document from a YAML file, validating every bucket
/// the same way a programmatic [`BucketDefinition`] is validated: the key
/// field must exist in the schema, TTL must parse, and `maxSize` must be
/// positive. A malformed bucket aborts the whole load -- no workers have
/// started yet, so there is nothing to roll back.
pub fn load_buckets_yaml(path: impl AsRef<Path>) -> Result<BTreeMap<String, BucketDefinition>> {
    let doc: RawBucketsDocument = Figment::new().merge(Yaml::file(path.as_ref())).extract()?;
    build_all(doc)
}

pub fn load_buckets_toml(path: impl AsRef<Path>) -> Result<BTreeMap<String, BucketDefinition>> {
    let doc: RawBucketsDocument = Figment::new().merge(Toml::file(path.as_ref())).extract()?;
    build_all(doc)
}

fn build_all(doc: RawBucketsDocument) -> Result<BTreeMap<String, BucketDefinition>> {
    let mut out = BTreeMap::new();
    for (name, raw) in doc.buckets {
        let def = build_bucket_definition(&name, raw)?;
        out.insert(name, def);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_a_minimal_yaml_document() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
buckets:
  users:
    key: id
    schema:
      id:
        type: string
      name:
        type: string
        required: true
    ttl: 5m
    maxSize: 1000
"#
        )
        .unwrap();

        let buckets = load_buckets_yaml(file.path()).unwrap();
        let users = buckets.get("users").unwrap();
        assert_eq!(users.key, "id");
        assert_eq!(users.max_size, Some(1000));
        assert!(users.ttl.is_some());
    }

    #[test]
    fn rejects_unknown_key_field_in_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
buckets:
  users:
    key: missing
    schema:
      id:
        type: string
"#
        )
        .unwrap();

        let err = load_buckets_yaml(file.path()).unwrap_err();
        assert!(matches!(err, crate::ConfigError::UnknownKeyField { .. }));
    }
}
