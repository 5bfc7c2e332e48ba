//! Field definitions: the declarative half of a bucket's schema.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// The six value types a field may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Date,
}

impl FieldType {
    /// Checks the *shape* of a value against this type; does not apply any
    /// constraint (`enum`/`min`/`pattern`/...), only the primitive shape
    /// check from step (c) of the validation algorithm.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => matches!(value, Value::Str(_)),
            FieldType::Number => match value {
                Value::Int(_) => true,
                Value::Float(f) => !f.is_nan(),
                _ => false,
            },
            FieldType::Boolean => matches!(value, Value::Bool(_)),
            FieldType::Object => matches!(value, Value::Map(_)),
            FieldType::Array => matches!(value, Value::List(_)),
            FieldType::Date => matches!(value, Value::Date(_) | Value::Int(_) | Value::Float(_) | Value::Str(_)),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
            FieldType::Date => "date",
        };
        f.write_str(s)
    }
}

/// The four generated-value strategies a field may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Generated {
    Uuid,
    Cuid,
    Autoincrement,
    Timestamp,
}

/// The three string formats a field may be constrained to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Format {
    Email,
    Url,
    IsoDate,
}

/// Either a fixed value or a zero-argument producer, used for `default`.
///
/// A plain `Value` is the common case (`default: 0`); the producer variant
/// covers defaults that must be computed per-insert (e.g. `default: || now()`).
#[derive(Clone)]
pub enum DefaultValue {
    Value(Value),
    Producer(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DefaultValue {
    pub fn produce(&self) -> Value {
        match self {
            DefaultValue::Value(v) => v.clone(),
            DefaultValue::Producer(f) => f(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Value(v) => write!(f, "DefaultValue::Value({v:?})"),
            DefaultValue::Producer(_) => write!(f, "DefaultValue::Producer(<fn>)"),
        }
    }
}

impl From<Value> for DefaultValue {
    fn from(v: Value) -> Self {
        DefaultValue::Value(v)
    }
}

/// The declaration of a single schema field.
#[derive(Debug, Clone, Default)]
pub struct FieldDefinition {
    pub field_type: Option<FieldType>,
    pub required: bool,
    pub default: Option<DefaultValue>,
    pub generated: Option<Generated>,
    pub enum_values: Option<Vec<Value>>,
    pub format: Option<Format>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<String>,
    pub unique: bool,
    /// Informational only -- never consulted by validation or indexing.
    pub ref_bucket: Option<String>,
}

impl FieldDefinition {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type: Some(field_type),
            ..Default::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<DefaultValue>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn generated(mut self, gen: Generated) -> Self {
        self.generated = Some(gen);
        self
    }

    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn min_length(mut self, n: usize) -> Self {
        self.min_length = Some(n);
        self
    }

    pub fn max_length(mut self, n: usize) -> Self {
        self.max_length = Some(n);
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_ref(mut self, bucket: impl Into<String>) -> Self {
        self.ref_bucket = Some(bucket.into());
        self
    }
}
