//! Time formatting helpers.
//!
//! Sync metadata timestamps are RFC3339 at nanosecond precision. A
//! second-precision stamp races against the file mtime written in the
//! same operation and produces spurious staleness alarms downstream.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{BraidError, Result};

/// Format a timestamp as RFC3339 with nanosecond precision, UTC (`Z`).
#[must_use]
pub fn rfc3339_nanos(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// The current instant, formatted for sync metadata.
#[must_use]
pub fn now_stamp() -> String {
    rfc3339_nanos(Utc::now())
}

/// Parse an RFC3339 timestamp into UTC.
///
/// # Errors
///
/// Returns a validation error if the string is not valid RFC3339.
pub fn parse_rfc3339(s: &str, field_name: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BraidError::validation(field_name, format!("invalid RFC3339 timestamp: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_rfc3339_nanos_precision() {
        let dt = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let s = rfc3339_nanos(dt);
        assert!(s.ends_with("Z"));
        assert!(s.contains(".123456789"));
    }

    #[test]
    fn test_nanos_roundtrip() {
        let dt = Utc.timestamp_opt(1_700_000_000, 42).unwrap();
        let parsed = parse_rfc3339(&rfc3339_nanos(dt), "stamp").unwrap();
        assert_eq!(parsed, dt);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_rfc3339("yesterday", "stamp").is_err());
    }
}
