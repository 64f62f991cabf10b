// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time formatting.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Format a UTC timestamp for storage.
///
/// Always millisecond precision with a `Z` suffix, so stored values sort
/// lexically in chronological order.
pub fn format_db_timestamp(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC3339 timestamp into UTC.
pub fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a timestamp that may be a full RFC3339 value or a bare `YYYY-MM-DD`
/// date (interpreted as midnight UTC).
pub fn parse_flexible_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    parse_rfc3339(raw).or_else(|| {
        chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_db_timestamp_is_fixed_width() {
        let a = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let b = a + chrono::Duration::milliseconds(7);
        assert_eq!(format_db_timestamp(a), "2026-01-02T03:04:05.000Z");
        assert_eq!(format_db_timestamp(b), "2026-01-02T03:04:05.007Z");
        assert!(format_db_timestamp(a) < format_db_timestamp(b));
    }

    #[test]
    fn test_parse_flexible_date() {
        let d = parse_flexible_date("2026-03-01").unwrap();
        assert_eq!(d, Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());

        let t = parse_flexible_date("2026-03-01T10:00:00Z").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap());

        assert!(parse_flexible_date("next tuesday").is_none());
    }
}
