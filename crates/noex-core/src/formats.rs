//! String format checks for the `format` field constraint.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]*://[^\s/]+").unwrap());

/// `local@domain` where `domain` contains at least one dot.
pub fn is_valid_email(s: &str) -> bool {
    EMAIL_RE.is_match(s)
}

/// Parseable as `scheme://host...`.
pub fn is_valid_url(s: &str) -> bool {
    URL_RE.is_match(s)
}

/// `YYYY-MM-DD` and an actual valid calendar date.
pub fn is_valid_iso_date(s: &str) -> bool {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_format() {
        assert!(is_valid_email("a@x.com"));
        assert!(!is_valid_email("a@x"));
        assert!(!is_valid_email("not-an-email"));
    }

    #[test]
    fn url_format() {
        assert!(is_valid_url("https://example.com/path"));
        assert!(!is_valid_url("not a url"));
    }

    #[test]
    fn iso_date_format() {
        assert!(is_valid_iso_date("2024-01-01"));
        assert!(!is_valid_iso_date("2024-13-40"));
        assert!(!is_valid_iso_date("01/01/2024"));
    }
}
