use chrono::{DateTime, NaiveDateTime, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

/// Stored integers and truncated floats below this bound are interpreted as
/// seconds rather than milliseconds.
const SECONDS_CUTOFF: i64 = 10_000_000_000; // 10^10

#[inline]
pub fn get_current_time_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Parses an ISO-8601 text timestamp to epoch milliseconds.
///
/// Accepts RFC 3339 forms (`2024-01-01T12:00:00Z`, with offset or fractional
/// seconds) and the naive form without an offset, which is taken as UTC.
pub fn parse_iso8601_millis(text: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc).timestamp_millis());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc().timestamp_millis());
    }
    None
}

/// Normalizes a stored integer to epoch milliseconds.
///
/// Values below 10^10 are epoch seconds; anything larger is already
/// milliseconds. The cutoff puts the ambiguity boundary in November 2286
/// seconds-wise, far past any second-resolution timestamp written today.
#[inline]
pub fn int_to_epoch_millis(value: i64) -> i64 {
    if value.abs() < SECONDS_CUTOFF {
        value.saturating_mul(1000)
    } else {
        value
    }
}

/// Normalizes a stored float to epoch milliseconds.
///
/// Floats whose truncation lies below 10^10 are fractional epoch seconds;
/// larger values are already milliseconds.
#[inline]
pub fn float_to_epoch_millis(value: f64) -> i64 {
    if (value.trunc() as i64).abs() < SECONDS_CUTOFF {
        (value * 1000.0).trunc() as i64
    } else {
        value.trunc() as i64
    }
}

/// Formats epoch milliseconds as RFC 3339 UTC text.
pub fn format_epoch_millis(millis: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(millis) {
        Some(dt) => dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        None => millis.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_current_time_millis_positive() {
        assert!(get_current_time_millis() > 0);
    }

    #[test]
    fn test_parse_rfc3339_utc() {
        let millis = parse_iso8601_millis("2024-01-01T12:00:00Z").unwrap();
        assert_eq!(millis, 1_704_110_400_000);
    }

    #[test]
    fn test_parse_rfc3339_with_offset() {
        let with_offset = parse_iso8601_millis("2024-01-01T13:00:00+01:00").unwrap();
        let utc = parse_iso8601_millis("2024-01-01T12:00:00Z").unwrap();
        assert_eq!(with_offset, utc);
    }

    #[test]
    fn test_parse_naive_taken_as_utc() {
        let naive = parse_iso8601_millis("2024-01-01T12:00:00").unwrap();
        assert_eq!(naive, 1_704_110_400_000);
    }

    #[test]
    fn test_parse_fractional_seconds() {
        let millis = parse_iso8601_millis("2024-01-01T12:00:00.250Z").unwrap();
        assert_eq!(millis, 1_704_110_400_250);
    }

    #[test]
    fn test_parse_garbage_returns_none() {
        assert!(parse_iso8601_millis("not a date").is_none());
        assert!(parse_iso8601_millis("").is_none());
    }

    #[test]
    fn test_int_seconds_scaled_to_millis() {
        assert_eq!(int_to_epoch_millis(1_704_110_400), 1_704_110_400_000);
    }

    #[test]
    fn test_int_millis_passed_through() {
        assert_eq!(int_to_epoch_millis(1_704_110_400_000), 1_704_110_400_000);
    }

    #[test]
    fn test_float_fractional_seconds() {
        assert_eq!(float_to_epoch_millis(1_704_110_400.5), 1_704_110_400_500);
    }

    #[test]
    fn test_float_millis_passed_through() {
        assert_eq!(float_to_epoch_millis(1_704_110_400_000.0), 1_704_110_400_000);
    }

    #[test]
    fn test_negative_seconds_scaled() {
        // pre-epoch second-resolution timestamps scale too
        assert_eq!(int_to_epoch_millis(-1000), -1_000_000);
    }

    #[test]
    fn test_format_round_trip() {
        let text = format_epoch_millis(1_704_110_400_000);
        assert_eq!(parse_iso8601_millis(&text).unwrap(), 1_704_110_400_000);
    }
}
