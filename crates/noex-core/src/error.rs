//! Schema validation errors.

use std::fmt;

/// The independent failure codes a single field can fail with. Matches §4.1
/// of the spec one-for-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueCode {
    Required,
    Type,
    Enum,
    MinLength,
    MaxLength,
    Pattern,
    Format,
    Min,
    Max,
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueCode::Required => "required",
            IssueCode::Type => "type",
            IssueCode::Enum => "enum",
            IssueCode::MinLength => "minLength",
            IssueCode::MaxLength => "maxLength",
            IssueCode::Pattern => "pattern",
            IssueCode::Format => "format",
            IssueCode::Min => "min",
            IssueCode::Max => "max",
        };
        f.write_str(s)
    }
}

/// One validation failure on one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub field: String,
    pub message: String,
    pub code: IssueCode,
}

impl Issue {
    pub fn new(field: impl Into<String>, code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code,
            message: message.into(),
        }
    }
}

/// Raised when one or more fields fail schema validation. Collects every
/// issue found rather than short-circuiting on the first.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("validation failed for bucket {bucket}: {} issue(s)", issues.len())]
pub struct ValidationError {
    pub bucket: String,
    pub issues: Vec<Issue>,
}

impl ValidationError {
    pub fn new(bucket: impl Into<String>, issues: Vec<Issue>) -> Self {
        Self {
            bucket: bucket.into(),
            issues,
        }
    }

    pub fn has_code(&self, field: &str, code: IssueCode) -> bool {
        self.issues
            .iter()
            .any(|i| i.field == field && i.code == code)
    }
}
