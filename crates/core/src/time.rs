use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{Result, TracedbError};

/// Current wall-clock time in microseconds since the UNIX epoch.
pub fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

pub fn micros_to_datetime(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

pub fn parse_duration_str(input: &str) -> Result<Duration> {
    humantime::parse_duration(input)
        .map_err(|e| TracedbError::Parse(format!("invalid duration {input}: {e}")))
}

/// RFC3339 timestamp, or a duration like "5m" interpreted relative to now.
pub fn parse_time_or_relative(input: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Ok(ts.with_timezone(&Utc));
    }

    if let Ok(duration) = humantime::parse_duration(input) {
        return Ok(Utc::now()
            - chrono::Duration::from_std(duration).map_err(|e| {
                TracedbError::Parse(format!("failed to convert duration to chrono: {e}"))
            })?);
    }

    Err(TracedbError::Parse(format!(
        "expected RFC3339 time or duration, got {input}"
    )))
}
