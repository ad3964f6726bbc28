//! Resolution of dashboard time-range expressions.
//!
//! Accepted forms:
//!
//! | Form              | Example                 |
//! |-------------------|-------------------------|
//! | relative          | `now`, `now-7d`, `now+1h` |
//! | relative, rounded | `now/d`, `now-1M/M`     |
//! | RFC 3339          | `2024-01-01T00:00:00Z`  |
//! | epoch millis      | `1704067200000`         |
//!
//! Calendar units (`d w M y`) are applied in the schedule's timezone so
//! `now-1d/d` means "yesterday" for the report's audience, not for UTC.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::clock::localize;
use crate::error::{ReportdError, Result};
use crate::types::TimeRange;

/// A time range pinned to concrete instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl ResolvedRange {
    /// Human form used in email templates.
    pub fn describe(&self, tz: Tz) -> String {
        format!(
            "{} to {}",
            self.from.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z"),
            self.to.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z")
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl Unit {
    fn parse(c: &str) -> Option<Self> {
        match c {
            "s" => Some(Unit::Second),
            "m" => Some(Unit::Minute),
            "h" => Some(Unit::Hour),
            "d" => Some(Unit::Day),
            "w" => Some(Unit::Week),
            "M" => Some(Unit::Month),
            "y" => Some(Unit::Year),
            _ => None,
        }
    }
}

impl TimeRange {
    /// Check both bounds parse without resolving them.
    pub fn validate(&self) -> Result<()> {
        let now = Utc::now();
        self.resolve(now, Tz::UTC).map(|_| ())
    }

    /// Pin the range against `now` in `tz`.
    pub fn resolve(&self, now: DateTime<Utc>, tz: Tz) -> Result<ResolvedRange> {
        let from = resolve_bound(&self.from, now, tz, false)?;
        let to = resolve_bound(&self.to, now, tz, true)?;
        if from > to {
            return Err(ReportdError::Validation(format!(
                "time range '{}' .. '{}' ends before it starts",
                self.from, self.to
            )));
        }
        Ok(ResolvedRange { from, to })
    }
}

fn invalid(expr: &str) -> ReportdError {
    ReportdError::Validation(format!("invalid time expression: '{expr}'"))
}

fn resolve_bound(expr: &str, now: DateTime<Utc>, tz: Tz, round_up: bool) -> Result<DateTime<Utc>> {
    let expr = expr.trim();
    if let Some(rest) = expr.strip_prefix("now") {
        return resolve_relative(expr, rest, now, tz, round_up);
    }
    if !expr.is_empty() && expr.chars().all(|c| c.is_ascii_digit()) {
        let millis: i64 = expr.parse().map_err(|_| invalid(expr))?;
        return DateTime::from_timestamp_millis(millis)
            .and_then(in_range)
            .ok_or_else(|| invalid(expr));
    }
    DateTime::parse_from_rfc3339(expr)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .and_then(in_range)
        .ok_or_else(|| invalid(expr))
}

fn resolve_relative(
    expr: &str,
    rest: &str,
    now: DateTime<Utc>,
    tz: Tz,
    round_up: bool,
) -> Result<DateTime<Utc>> {
    let (offset, rounding) = match rest.split_once('/') {
        Some((offset, unit)) => (offset, Some(Unit::parse(unit).ok_or_else(|| invalid(expr))?)),
        None => (rest, None),
    };

    let mut at = now;
    if !offset.is_empty() {
        let (sign, body) = if let Some(body) = offset.strip_prefix('-') {
            (-1, body)
        } else if let Some(body) = offset.strip_prefix('+') {
            (1, body)
        } else {
            return Err(invalid(expr));
        };
        let split = body
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| invalid(expr))?;
        let (digits, unit) = body.split_at(split);
        let amount: i64 = digits.parse().map_err(|_| invalid(expr))?;
        let unit = Unit::parse(unit).ok_or_else(|| invalid(expr))?;
        at = shift(at, sign * amount, unit, tz).ok_or_else(|| invalid(expr))?;
    }

    match rounding {
        Some(unit) => round(at, unit, tz, round_up).ok_or_else(|| invalid(expr)),
        None => Ok(at),
    }
}

/// Instants outside years 1..=9999 are rejected before any local-time math.
fn in_range<T: Datelike>(t: T) -> Option<T> {
    (1..=9999).contains(&t.year()).then_some(t)
}

fn shift(at: DateTime<Utc>, amount: i64, unit: Unit, tz: Tz) -> Option<DateTime<Utc>> {
    let step = |d: Option<Duration>| d.and_then(|d| at.checked_add_signed(d)).and_then(in_range);
    match unit {
        Unit::Second => step(Duration::try_seconds(amount)),
        Unit::Minute => step(Duration::try_minutes(amount)),
        Unit::Hour => step(Duration::try_hours(amount)),
        Unit::Day | Unit::Week | Unit::Month | Unit::Year => {
            let local = at.with_timezone(&tz).naive_local();
            let moved = match unit {
                Unit::Day => local.checked_add_signed(Duration::try_days(amount)?)?,
                Unit::Week => local.checked_add_signed(Duration::try_weeks(amount)?)?,
                Unit::Month => add_months(local, amount)?,
                _ => add_months(local, amount.checked_mul(12)?)?,
            };
            localize(tz, in_range(moved)?).map(|dt| dt.with_timezone(&Utc))
        }
    }
}

fn add_months(local: NaiveDateTime, months: i64) -> Option<NaiveDateTime> {
    let m = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        local.checked_add_months(m)
    } else {
        local.checked_sub_months(m)
    }
}

fn round(at: DateTime<Utc>, unit: Unit, tz: Tz, round_up: bool) -> Option<DateTime<Utc>> {
    let local = at.with_timezone(&tz).naive_local();
    let date = local.date();
    let (start, next): (NaiveDateTime, NaiveDateTime) = match unit {
        Unit::Second => {
            let s = local.with_nanosecond(0)?;
            (s, s.checked_add_signed(Duration::seconds(1))?)
        }
        Unit::Minute => {
            let s = local.with_nanosecond(0)?.with_second(0)?;
            (s, s.checked_add_signed(Duration::minutes(1))?)
        }
        Unit::Hour => {
            let s = date.and_hms_opt(local.hour(), 0, 0)?;
            (s, s.checked_add_signed(Duration::hours(1))?)
        }
        Unit::Day => {
            let s = date.and_time(NaiveTime::MIN);
            (s, s.checked_add_signed(Duration::days(1))?)
        }
        Unit::Week => {
            let monday = date.checked_sub_signed(Duration::days(i64::from(date.weekday().num_days_from_monday())))?;
            let s = monday.and_time(NaiveTime::MIN);
            (s, s.checked_add_signed(Duration::weeks(1))?)
        }
        Unit::Month => {
            let s = NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?.and_time(NaiveTime::MIN);
            (s, s.checked_add_months(Months::new(1))?)
        }
        Unit::Year => {
            let s = NaiveDate::from_ymd_opt(date.year(), 1, 1)?.and_time(NaiveTime::MIN);
            (s, s.checked_add_months(Months::new(12))?)
        }
    };

    if round_up {
        let end = localize(tz, next)?.with_timezone(&Utc);
        Some(end - Duration::milliseconds(1))
    } else {
        localize(tz, start).map(|dt| dt.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn range(from: &str, to: &str) -> TimeRange {
        TimeRange {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 14, 30, 0).unwrap()
    }

    #[test]
    fn plain_offsets() {
        let r = range("now-7d", "now").resolve(now(), Tz::UTC).unwrap();
        assert_eq!(r.from, Utc.with_ymd_and_hms(2024, 3, 8, 14, 30, 0).unwrap());
        assert_eq!(r.to, now());

        let r = range("now-90m", "now+1h").resolve(now(), Tz::UTC).unwrap();
        assert_eq!(r.from, Utc.with_ymd_and_hms(2024, 3, 15, 13, 0, 0).unwrap());
        assert_eq!(r.to, Utc.with_ymd_and_hms(2024, 3, 15, 15, 30, 0).unwrap());
    }

    #[test]
    fn yesterday_in_local_timezone() {
        let tz = chrono_tz::America::New_York;
        let r = range("now-1d/d", "now-1d/d").resolve(now(), tz).unwrap();
        // 2024-03-14 in New York is EDT (-04:00).
        assert_eq!(r.from, Utc.with_ymd_and_hms(2024, 3, 14, 4, 0, 0).unwrap());
        assert_eq!(
            r.to,
            Utc.with_ymd_and_hms(2024, 3, 15, 3, 59, 59).unwrap() + Duration::milliseconds(999)
        );
    }

    #[test]
    fn month_rounding() {
        let r = range("now/M", "now").resolve(now(), Tz::UTC).unwrap();
        assert_eq!(r.from, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        let r = range("now-1M/M", "now-1M/M").resolve(now(), Tz::UTC).unwrap();
        assert_eq!(r.from, Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        assert_eq!(
            r.to,
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() - Duration::milliseconds(1)
        );
    }

    #[test]
    fn week_rounds_to_monday() {
        // 2024-03-15 is a Friday.
        let r = range("now/w", "now").resolve(now(), Tz::UTC).unwrap();
        assert_eq!(r.from, Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap());
    }

    #[test]
    fn absolute_forms() {
        let r = range("2024-01-01T00:00:00Z", "1704153600000")
            .resolve(now(), Tz::UTC)
            .unwrap();
        assert_eq!(r.from, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(r.to, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["yesterday", "now-", "now-5", "now-5q", "now*2d", "now/q", ""] {
            assert!(range(bad, "now").validate().is_err(), "{bad} accepted");
        }
        assert!(range("now", "now-1d").validate().is_err());
    }

    #[test]
    fn huge_offsets_are_invalid_not_fatal() {
        for bad in [
            "now-9999999999h",
            "now-99999999999999999s",
            "now-999999999999999d",
            "now+999999999999999w",
            "now-9223372036854775807m",
            "now-99999999y",
            "now+9999999M/M",
            "99999999999999999",
            "+262142-01-01T00:00:00Z",
        ] {
            let err = range(bad, "now").validate().unwrap_err();
            assert_eq!(err.code(), "VALIDATION_ERROR", "{bad}");
        }
        assert!(range("now-5000y", "now").resolve(now(), Tz::UTC).is_err());
        assert!(range("now-2000y", "now").resolve(now(), Tz::UTC).is_ok());
    }

    #[test]
    fn describe_uses_timezone_abbreviation() {
        let r = range("now-1h", "now").resolve(now(), Tz::UTC).unwrap();
        assert_eq!(
            r.describe(Tz::UTC),
            "2024-03-15 13:30 UTC to 2024-03-15 14:30 UTC"
        );
    }
}
