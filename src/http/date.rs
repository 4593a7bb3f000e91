//! HTTP-date formatting and parsing.
//!
//! HTTP dates carry whole seconds only; callers comparing against them
//! should truncate `now` with [`truncate_to_seconds`].

use chrono::{DateTime, Duration, NaiveDateTime, Timelike, Utc};

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Formats `time` as an IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format_http_date(time: DateTime<Utc>) -> String {
    time.format(HTTP_DATE_FORMAT).to_string()
}

/// Parses an HTTP date. Returns `None` for anything unparseable, including
/// the `0` and `-1` values servers use to mean "already expired".
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, HTTP_DATE_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|time| time.with_timezone(&Utc))
}

/// Drops sub-second precision.
pub fn truncate_to_seconds(time: DateTime<Utc>) -> DateTime<Utc> {
    time.with_nanosecond(0).unwrap_or(time)
}

/// Rounds up to the next whole second. Whole seconds are returned as is.
pub fn ceil_to_seconds(time: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = truncate_to_seconds(time);
    if truncated == time {
        return time;
    }
    truncated
        .checked_add_signed(Duration::seconds(1))
        .unwrap_or(truncated)
}
