//! Local wall-clock schedule times to UTC

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),
    #[error("invalid scheduled time: {0}")]
    InvalidTime(String),
    #[error("{0} does not exist in {1} (daylight saving gap)")]
    Nonexistent(String, String),
}

pub fn parse_timezone(timezone: &str) -> Result<Tz, ScheduleError> {
    timezone
        .parse::<Tz>()
        .map_err(|_| ScheduleError::UnknownTimezone(timezone.to_string()))
}

/// Interpret `local` in `timezone` and return the UTC instant.
///
/// Accepts a naive `YYYY-MM-DDTHH:MM[:SS]` wall-clock time, or an RFC 3339
/// timestamp whose own offset wins. Ambiguous times (DST fall-back) resolve
/// to the earlier instant.
pub fn local_to_utc(local: &str, timezone: &str) -> Result<DateTime<Utc>, ScheduleError> {
    let tz = parse_timezone(timezone)?;
    let local = local.trim();

    if let Ok(with_offset) = DateTime::parse_from_rfc3339(local) {
        return Ok(with_offset.with_timezone(&Utc));
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(local, fmt).ok())
        .ok_or_else(|| ScheduleError::InvalidTime(local.to_string()))?;

    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => Err(ScheduleError::Nonexistent(local.to_string(), timezone.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_york_summer_and_winter() {
        let summer = local_to_utc("2025-07-04T09:30", "America/New_York").unwrap();
        assert_eq!(summer.to_rfc3339(), "2025-07-04T13:30:00+00:00");

        let winter = local_to_utc("2025-01-15T09:30:00", "America/New_York").unwrap();
        assert_eq!(winter.to_rfc3339(), "2025-01-15T14:30:00+00:00");
    }

    #[test]
    fn test_rfc3339_keeps_its_offset() {
        let utc = local_to_utc("2025-07-04T09:30:00+02:00", "America/New_York").unwrap();
        assert_eq!(utc.to_rfc3339(), "2025-07-04T07:30:00+00:00");
    }

    #[test]
    fn test_dst_gap_is_rejected() {
        let err = local_to_utc("2025-03-09T02:30", "America/New_York").unwrap_err();
        assert!(matches!(err, ScheduleError::Nonexistent(..)));
    }

    #[test]
    fn test_ambiguous_time_takes_earliest() {
        // 01:30 happens twice on 2025-11-02; the first is still EDT (UTC-4)
        let utc = local_to_utc("2025-11-02T01:30", "America/New_York").unwrap();
        assert_eq!(utc.to_rfc3339(), "2025-11-02T05:30:00+00:00");
    }

    #[test]
    fn test_bad_input() {
        assert_eq!(
            local_to_utc("2025-07-04T09:30", "Mars/Olympus"),
            Err(ScheduleError::UnknownTimezone("Mars/Olympus".into()))
        );
        assert!(matches!(
            local_to_utc("next tuesday", "UTC"),
            Err(ScheduleError::InvalidTime(_))
        ));
    }
}
