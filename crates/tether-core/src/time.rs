//! Epoch-millisecond clock helpers.

use chrono::{TimeZone, Utc};

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Format an epoch-millisecond timestamp as RFC 3339 (UTC, millisecond precision).
///
/// Out-of-range values render as `"invalid"`.
#[must_use]
pub fn format_ms(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        None => "invalid".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_after_2024() {
        assert!(now_ms() > 1_704_067_200_000);
    }

    #[test]
    fn format_epoch_zero() {
        assert_eq!(format_ms(0), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn format_known_timestamp() {
        assert_eq!(format_ms(1_767_225_600_123), "2026-01-01T00:00:00.123Z");
    }

    #[test]
    fn format_out_of_range() {
        assert_eq!(format_ms(i64::MAX), "invalid");
    }
}
