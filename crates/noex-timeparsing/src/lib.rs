//! TTL duration grammar: either a positive finite millisecond count, or a
//! human string `Ns|Nm|Nh|Nd` (integer or decimal), parsed synchronously at
//! bucket registration so a malformed value is rejected before any worker
//! starts.

use once_cell::sync::Lazy;
use regex::Regex;

use noex_core::TtlInput;

static HUMAN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*([smhd])\s*$").unwrap());

const FACTOR_SECOND: f64 = 1_000.0;
const FACTOR_MINUTE: f64 = 60_000.0;
const FACTOR_HOUR: f64 = 3_600_000.0;
const FACTOR_DAY: f64 = 86_400_000.0;

/// Raised by [`parse_ttl`] for any input that is not a positive, finite
/// duration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TtlParseError {
    #[error("ttl must be a positive finite duration, got {0}")]
    NotPositiveFinite(String),
    #[error("ttl string {0:?} does not match the `Ns|Nm|Nh|Nd` grammar")]
    Unparseable(String),
}

/// Parses a [`TtlInput`] into a millisecond count. Zero, negative,
/// non-finite, or unparseable values are rejected.
pub fn parse_ttl(input: &TtlInput) -> Result<i64, TtlParseError> {
    match input {
        TtlInput::Millis(ms) => {
            if *ms > 0 {
                Ok(*ms)
            } else {
                Err(TtlParseError::NotPositiveFinite(ms.to_string()))
            }
        }
        TtlInput::Human(s) => parse_human(s),
    }
}

fn parse_human(s: &str) -> Result<i64, TtlParseError> {
    let caps = HUMAN_RE
        .captures(s)
        .ok_or_else(|| TtlParseError::Unparseable(s.to_owned()))?;
    let magnitude: f64 = caps[1]
        .parse()
        .map_err(|_| TtlParseError::Unparseable(s.to_owned()))?;
    let factor = match &caps[2] {
        "s" => FACTOR_SECOND,
        "m" => FACTOR_MINUTE,
        "h" => FACTOR_HOUR,
        "d" => FACTOR_DAY,
        other => return Err(TtlParseError::Unparseable(format!("unknown unit {other}"))),
    };
    let ms = magnitude * factor;
    if !ms.is_finite() || ms <= 0.0 {
        return Err(TtlParseError::NotPositiveFinite(s.to_owned()));
    }
    Ok(ms.round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_must_be_positive() {
        assert_eq!(parse_ttl(&TtlInput::Millis(500)).unwrap(), 500);
        assert!(parse_ttl(&TtlInput::Millis(0)).is_err());
        assert!(parse_ttl(&TtlInput::Millis(-1)).is_err());
    }

    #[test]
    fn human_units_apply_correct_factor() {
        assert_eq!(parse_ttl(&TtlInput::Human("1s".into())).unwrap(), 1_000);
        assert_eq!(parse_ttl(&TtlInput::Human("5m".into())).unwrap(), 300_000);
        assert_eq!(parse_ttl(&TtlInput::Human("2h".into())).unwrap(), 7_200_000);
        assert_eq!(parse_ttl(&TtlInput::Human("1d".into())).unwrap(), 86_400_000);
    }

    #[test]
    fn human_allows_decimals_and_whitespace() {
        assert_eq!(parse_ttl(&TtlInput::Human(" 1.5h ".into())).unwrap(), 5_400_000);
    }

    #[test]
    fn human_rejects_unknown_unit_and_garbage() {
        assert!(parse_ttl(&TtlInput::Human("5y".into())).is_err());
        assert!(parse_ttl(&TtlInput::Human("abc".into())).is_err());
        assert!(parse_ttl(&TtlInput::Human("-5m".into())).is_err());
        assert!(parse_ttl(&TtlInput::Human("0s".into())).is_err());
    }
}
