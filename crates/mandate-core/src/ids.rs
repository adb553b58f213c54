//! ID and timestamp utilities.

use chrono::{NaiveDate, SecondsFormat, Utc};
use uuid::Uuid;

/// Opaque session identifier (UUID v4 string).
#[must_use]
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current instant as an ISO-8601 UTC string.
#[must_use]
pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Today's date in UTC.
#[must_use]
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

/// Milliseconds since UNIX epoch (for durations).
#[must_use]
pub fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_format() {
        let s = new_session_id();
        assert_eq!(s.len(), 36);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit() || c == '-'));
    }

    #[test]
    fn iso_timestamp_is_utc() {
        let t = now_utc_iso();
        assert!(t.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&t).is_ok());
    }
}
