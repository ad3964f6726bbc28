//! Timezone helpers shared by recurrence and time-range resolution.

use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{ReportdError, Result};

/// Parse an IANA timezone name. An empty name means UTC.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    if name.trim().is_empty() {
        return Ok(Tz::UTC);
    }
    name.trim()
        .parse::<Tz>()
        .map_err(|_| ReportdError::Validation(format!("unknown timezone: {name}")))
}

/// Map a local wall-clock time to an instant.
///
/// Ambiguous times (DST fall-back) resolve to the earlier instant. Times that
/// do not exist (DST spring-forward gap) move forward to the first valid
/// minute after the gap.
pub fn localize(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
        return Some(dt);
    }
    // Gaps are at most a few hours wide in practice.
    let mut probe = naive;
    for _ in 0..(4 * 60) {
        probe += Duration::minutes(1);
        if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
            return Some(dt);
        }
    }
    None
}

/// Canonical storage form: RFC 3339, millisecond precision, `Z` suffix.
///
/// Lexical order of these strings equals chronological order.
pub fn to_storage(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn from_storage(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ReportdError::Database(format!("bad timestamp '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn empty_timezone_is_utc() {
        assert_eq!(parse_timezone("").unwrap(), Tz::UTC);
        assert_eq!(
            parse_timezone("America/New_York").unwrap(),
            chrono_tz::America::New_York
        );
        assert!(parse_timezone("Mars/Olympus_Mons").is_err());
    }

    #[test]
    fn gap_moves_forward() {
        // 2024-03-10 02:30 does not exist in New York.
        let naive = NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(2, 30, 0)
            .unwrap();
        let dt = localize(chrono_tz::America::New_York, naive).unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-10T03:00:00-04:00");
    }

    #[test]
    fn ambiguous_takes_earliest() {
        // 2024-11-03 01:30 happens twice in New York.
        let naive = NaiveDate::from_ymd_opt(2024, 11, 3)
            .unwrap()
            .and_hms_opt(1, 30, 0)
            .unwrap();
        let dt = localize(chrono_tz::America::New_York, naive).unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-11-03T01:30:00-04:00");
    }

    #[test]
    fn storage_format_sorts_lexically() {
        let a = Utc.with_ymd_and_hms(2024, 1, 9, 23, 59, 59).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert!(to_storage(a) < to_storage(b));
        assert_eq!(to_storage(b), "2024-01-10T00:00:00.000Z");
        assert_eq!(from_storage(&to_storage(a)).unwrap(), a);
    }
}
