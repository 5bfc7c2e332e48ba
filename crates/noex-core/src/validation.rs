//! The schema validator: `prepare_insert`, `prepare_update`, and `validate`.

use std::sync::atomic::AtomicI64;

use regex::Regex;

use crate::bucket_def::BucketDefinition;
use crate::error::{Issue, IssueCode, ValidationError};
use crate::field::{FieldDefinition, Format, Generated};
use crate::formats;
use crate::idgen::{self, AutoIncrementCounter};
use crate::record::{is_reserved_field, now_ms, Record, RecordMeta};
use crate::value::Value;

/// Prepares and validates records against one bucket's schema. Borrowed for
/// the lifetime of a single operation -- it is stateless beyond the schema
/// reference, so a bucket worker can construct one per request or keep one
/// around for its whole lifetime.
pub struct SchemaValidator<'a> {
    bucket: &'a str,
    def: &'a BucketDefinition,
}

impl<'a> SchemaValidator<'a> {
    pub fn new(bucket: &'a str, def: &'a BucketDefinition) -> Self {
        Self { bucket, def }
    }

    fn is_absent(value: Option<&Value>) -> bool {
        matches!(value, None | Some(Value::Null))
    }

    /// Step (1)-(5) of `prepareInsert`: fill generated fields, then defaults,
    /// stamp metadata, validate, and return the merged record.
    pub fn prepare_insert(
        &self,
        mut input: Record,
        counter: &AutoIncrementCounter,
        cuid_seq: &AtomicI64,
    ) -> Result<Record, ValidationError> {
        // (1) generated fields, only when the caller left them absent.
        for (name, field_def) in &self.def.schema {
            let Some(generated) = field_def.generated else {
                continue;
            };
            if !Self::is_absent(input.get(name)) {
                continue;
            }
            let value = match generated {
                Generated::Uuid => Value::Str(idgen::generate_uuid()),
                Generated::Cuid => Value::Str(idgen::generate_cuid(cuid_seq)),
                Generated::Autoincrement => Value::Int(counter.next()),
                Generated::Timestamp => Value::Int(idgen::generate_timestamp()),
            };
            input.insert(name.clone(), value);
        }

        // (2) defaults, for whatever is still absent.
        for (name, field_def) in &self.def.schema {
            if !Self::is_absent(input.get(name)) {
                continue;
            }
            if let Some(default) = &field_def.default {
                input.insert(name.clone(), default.produce());
            }
        }

        // (3) metadata.
        let now = now_ms();
        input.set_meta_version(1);
        input.set_meta_created_at(now);
        input.set_meta_updated_at(now);

        // (4)
        self.validate(&input)?;

        // (5)
        Ok(input)
    }

    /// Steps (1)-(5) of `prepareUpdate`. The caller is responsible for
    /// raising `RecordNotFound` when there is no existing record; this
    /// function only ever sees a present `existing`.
    pub fn prepare_update(
        &self,
        existing: &Record,
        changes: Record,
    ) -> Result<Record, ValidationError> {
        // (1) sanitize: drop the primary key, generated fields, and reserved fields.
        let mut sanitized = changes;
        sanitized.remove(&self.def.key);
        for (name, field_def) in &self.def.schema {
            if field_def.generated.is_some() {
                sanitized.remove(name);
            }
        }
        sanitized.retain(|name, _| !is_reserved_field(name));

        // (2) merge.
        let mut merged = existing.clone();
        merged.extend(sanitized);

        // (3) metadata.
        merged.set_meta_version(existing.meta_version() + 1);
        merged.set_meta_updated_at(now_ms());
        merged.set_meta_created_at(existing.meta_created_at());

        // (4)
        self.validate(&merged)?;

        // (5)
        Ok(merged)
    }

    /// The validation algorithm from §4.1: walk every schema field,
    /// collecting every independent issue rather than stopping at the first.
    pub fn validate(&self, record: &Record) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        for (name, field_def) in &self.def.schema {
            let value = record.get(name);

            if Self::is_absent(value) {
                if field_def.required {
                    issues.push(Issue::new(name, IssueCode::Required, "field is required"));
                }
                continue;
            }
            let value = value.unwrap();

            let Some(field_type) = field_def.field_type else {
                continue;
            };
            if !field_type.matches(value) {
                issues.push(Issue::new(
                    name,
                    IssueCode::Type,
                    format!("expected {field_type}, got {}", value.type_name()),
                ));
                continue;
            }

            Self::check_constraints(name, field_def, value, &mut issues);
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(self.bucket, issues))
        }
    }

    fn check_constraints(
        name: &str,
        field_def: &FieldDefinition,
        value: &Value,
        issues: &mut Vec<Issue>,
    ) {
        if let Some(allowed) = &field_def.enum_values {
            if !allowed.iter().any(|v| v == value) {
                issues.push(Issue::new(
                    name,
                    IssueCode::Enum,
                    "value is not one of the allowed enum values",
                ));
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = field_def.min {
                if n < min {
                    issues.push(Issue::new(name, IssueCode::Min, format!("must be >= {min}")));
                }
            }
            if let Some(max) = field_def.max {
                if n > max {
                    issues.push(Issue::new(name, IssueCode::Max, format!("must be <= {max}")));
                }
            }
        }

        if let Some(s) = value.as_str() {
            let len = s.chars().count();
            if let Some(min_len) = field_def.min_length {
                if len < min_len {
                    issues.push(Issue::new(
                        name,
                        IssueCode::MinLength,
                        format!("must be at least {min_len} characters"),
                    ));
                }
            }
            if let Some(max_len) = field_def.max_length {
                if len > max_len {
                    issues.push(Issue::new(
                        name,
                        IssueCode::MaxLength,
                        format!("must be at most {max_len} characters"),
                    ));
                }
            }
            if let Some(pattern) = &field_def.pattern {
                match Regex::new(pattern) {
                    Ok(re) if re.is_match(s) => {}
                    _ => issues.push(Issue::new(
                        name,
                        IssueCode::Pattern,
                        format!("does not match pattern {pattern}"),
                    )),
                }
            }
            if let Some(format) = field_def.format {
                let ok = match format {
                    Format::Email => formats::is_valid_email(s),
                    Format::Url => formats::is_valid_url(s),
                    Format::IsoDate => formats::is_valid_iso_date(s),
                };
                if !ok {
                    issues.push(Issue::new(
                        name,
                        IssueCode::Format,
                        format!("does not match format {format:?}"),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use std::sync::atomic::AtomicI64;

    fn schema() -> BucketDefinition {
        BucketDefinition::new("users", "id")
            .field(
                "id",
                FieldDefinition::new(FieldType::String).generated(Generated::Uuid),
            )
            .field(
                "name",
                FieldDefinition::new(FieldType::String).required().min_length(2),
            )
            .field("age", FieldDefinition::new(FieldType::Number).min(0.0))
            .field(
                "role",
                FieldDefinition::new(FieldType::String)
                    .with_enum(vec![Value::from("a"), Value::from("b")]),
            )
    }

    #[test]
    fn auto_id_insert_generates_distinct_uuids() {
        let def = schema();
        let validator = SchemaValidator::new("users", &def);
        let counter = AutoIncrementCounter::new();
        let seq = AtomicI64::new(0);

        let mut input1 = Record::new();
        input1.insert("name".into(), Value::from("A"));
        let r1 = validator.prepare_insert(input1, &counter, &seq).unwrap();

        let mut input2 = Record::new();
        input2.insert("name".into(), Value::from("B"));
        let r2 = validator.prepare_insert(input2, &counter, &seq).unwrap();

        assert_ne!(r1.get("id"), r2.get("id"));
        assert_eq!(r1.meta_version(), 1);
    }

    #[test]
    fn validation_aggregates_all_issues() {
        let def = schema();
        let validator = SchemaValidator::new("users", &def);
        let counter = AutoIncrementCounter::new();
        let seq = AtomicI64::new(0);

        let mut input = Record::new();
        input.insert("name".into(), Value::from(""));
        input.insert("age".into(), Value::Int(-1));
        input.insert("role".into(), Value::from("c"));

        let err = validator
            .prepare_insert(input, &counter, &seq)
            .unwrap_err();
        assert!(err.has_code("name", IssueCode::MinLength));
        assert!(err.has_code("age", IssueCode::Min));
        assert!(err.has_code("role", IssueCode::Enum));
    }

    #[test]
    fn prepare_update_bumps_version_and_strips_reserved_fields() {
        let def = schema();
        let validator = SchemaValidator::new("users", &def);
        let counter = AutoIncrementCounter::new();
        let seq = AtomicI64::new(0);

        let mut input = Record::new();
        input.insert("name".into(), Value::from("Alice"));
        let existing = validator.prepare_insert(input, &counter, &seq).unwrap();

        let mut changes = Record::new();
        changes.insert("name".into(), Value::from("Alicia"));
        changes.insert("_version".into(), Value::Int(999));
        changes.insert("id".into(), Value::from("attacker-controlled"));

        let updated = validator.prepare_update(&existing, changes).unwrap();
        assert_eq!(updated.meta_version(), 2);
        assert_eq!(updated.get("id"), existing.get("id"));
        assert_eq!(updated.get("name"), Some(&Value::from("Alicia")));
    }
}
