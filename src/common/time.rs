use std::time::Duration;
use chrono::{TimeZone, Utc};
use crate::common::types::Timestamp;

/// Returns the time duration since UNIX_EPOCH in milliseconds.
pub fn current_time_millis() -> Timestamp {
    Utc::now().timestamp_millis()
}

pub fn duration_to_millis(duration: Duration) -> i64 {
    duration.as_millis().min(i64::MAX as u128) as i64
}

/// Parses durations in Prometheus notation ("5m", "1h30m", "250ms"). Bare integers are
/// taken as milliseconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(millis) = s.parse::<u64>() {
        return Ok(Duration::from_millis(millis));
    }
    promql_parser::util::parse_duration(s)
        .map_err(|e| format!("Failed to parse duration \"{s}\": {e}"))
}

/// RFC 3339 rendering of a millisecond timestamp, used in reports.
pub fn format_timestamp(ts: Timestamp) -> String {
    match Utc.timestamp_millis_opt(ts).single() {
        Some(dt) => dt.to_rfc3339(),
        None => ts.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("1500").unwrap(), Duration::from_millis(1500));
        assert!(parse_duration("five minutes").is_err());
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01T00:00:00+00:00");
    }
}
