//! Time utilities for session identifiers and stored timestamps

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// Session id derived from the creation timestamp. The short random suffix
/// keeps two instances started in the same millisecond apart.
pub fn generate_session_id(created_at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}",
        created_at.format("%Y%m%d_%H%M%S_%3f"),
        &suffix[..6]
    )
}

/// Fixed-width RFC3339 so stored timestamps sort lexically
pub fn format_datetime(datetime: &DateTime<Utc>) -> String {
    datetime.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse datetime from SQLite format or RFC3339 format
pub fn parse_datetime(datetime_str: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(naive_dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S") {
        return Ok(DateTime::from_naive_utc_and_offset(naive_dt, Utc));
    }

    Err(format!("Unable to parse datetime: {}", datetime_str))
}
