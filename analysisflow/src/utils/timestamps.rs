//! Timestamp utilities.

use chrono::{DateTime, Duration, Utc};

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC time as an ISO 8601 formatted string.
///
/// Format: `YYYY-MM-DDTHH:MM:SS.ffffff+00:00`
///
/// # Examples
///
/// ```
/// use analysisflow::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with("+00:00"));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Upper bound for deadlines, roughly one hundred years.
const MAX_DEADLINE_SECONDS: i64 = 100 * 365 * 24 * 3600;

/// Returns the instant `seconds` after `from`.
#[must_use]
pub fn deadline_after(from: Timestamp, seconds: u64) -> Timestamp {
    let seconds = i64::try_from(seconds)
        .unwrap_or(MAX_DEADLINE_SECONDS)
        .min(MAX_DEADLINE_SECONDS);
    from + Duration::seconds(seconds)
}

/// Returns the elapsed seconds from `start` to `end`, clamped at zero.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn seconds_between(start: Timestamp, end: Timestamp) -> f64 {
    (end - start).num_milliseconds().max(0) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_deadline_after() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let deadline = deadline_after(start, 90);
        assert_eq!(deadline, Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 30).unwrap());
    }

    #[test]
    fn test_seconds_between_clamps() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap();
        assert!((seconds_between(start, end) - 5.0).abs() < f64::EPSILON);
        assert!(seconds_between(end, start).abs() < f64::EPSILON);
    }
}
