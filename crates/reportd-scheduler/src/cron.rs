//! Five-field cron expressions evaluated in a named timezone.
//!
//! `MIN HOUR DOM MON DOW`, each field accepting `*`, `N`, `A-B`, `*/S`,
//! `A-B/S`, `A/S` and comma lists. Months accept `jan`..`dec`, weekdays
//! `sun`..`sat`; weekday `7` is Sunday. When both day-of-month and
//! day-of-week are restricted a day matches if either does.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// How far ahead `next_after` searches before giving up (covers Feb 29).
const MAX_LOOKAHEAD_DAYS: u32 = 366 * 5;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cron expression '{expr}': {reason}")]
pub struct CronError {
    pub expr: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl Field {
    fn bounds(self) -> (u32, u32) {
        match self {
            Field::Minute => (0, 59),
            Field::Hour => (0, 23),
            Field::DayOfMonth => (1, 31),
            Field::Month => (1, 12),
            // 7 is accepted and folded onto 0 (Sunday).
            Field::DayOfWeek => (0, 7),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Field::Minute => "minute",
            Field::Hour => "hour",
            Field::DayOfMonth => "day-of-month",
            Field::Month => "month",
            Field::DayOfWeek => "day-of-week",
        }
    }

    fn value(self, token: &str) -> Result<u32, String> {
        let lower = token.to_ascii_lowercase();
        let named = match self {
            Field::Month => MONTH_NAMES.iter().position(|n| *n == lower).map(|i| i as u32 + 1),
            Field::DayOfWeek => DAY_NAMES.iter().position(|n| *n == lower).map(|i| i as u32),
            _ => None,
        };
        let v = match named {
            Some(v) => v,
            None => token
                .parse::<u32>()
                .map_err(|_| format!("{}: '{token}' is not a number", self.name()))?,
        };
        let (lo, hi) = self.bounds();
        if v < lo || v > hi {
            return Err(format!("{}: {v} outside {lo}-{hi}", self.name()));
        }
        Ok(v)
    }
}

/// Set of allowed values for one field, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bits(u64);

impl Bits {
    fn contains(self, v: u32) -> bool {
        self.0 & (1u64 << v) != 0
    }

    fn iter(self, lo: u32, hi: u32) -> impl Iterator<Item = u32> {
        (lo..=hi).filter(move |v| self.contains(*v))
    }
}

fn parse_field(spec: &str, field: Field) -> Result<Bits, String> {
    let (lo, hi) = field.bounds();
    let mut bits = 0u64;

    for item in spec.split(',') {
        if item.is_empty() {
            return Err(format!("{}: empty list item", field.name()));
        }
        let (range, step) = match item.split_once('/') {
            Some((r, s)) => {
                let step = s
                    .parse::<u32>()
                    .map_err(|_| format!("{}: bad step '{s}'", field.name()))?;
                if step == 0 {
                    return Err(format!("{}: step must be positive", field.name()));
                }
                (r, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if range == "*" {
            (lo, hi)
        } else if let Some((a, b)) = range.split_once('-') {
            let (a, b) = (field.value(a)?, field.value(b)?);
            if a > b {
                return Err(format!("{}: range {a}-{b} is reversed", field.name()));
            }
            (a, b)
        } else {
            let a = field.value(range)?;
            // `A/S` runs from A to the end of the field.
            (a, if step.is_some() { hi } else { a })
        };

        let step = step.unwrap_or(1) as usize;
        for v in (start..=end).step_by(step) {
            bits |= 1u64 << v;
        }
    }

    if let Field::DayOfWeek = field {
        if bits & (1 << 7) != 0 {
            bits = (bits & !(1 << 7)) | 1;
        }
    }
    Ok(Bits(bits))
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    minutes: Bits,
    hours: Bits,
    days_of_month: Bits,
    months: Bits,
    days_of_week: Bits,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let err = |reason: String| CronError {
            expr: expr.to_string(),
            reason,
        };
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(err(format!(
                "expected 5 fields (MIN HOUR DOM MON DOW), got {}",
                parts.len()
            )));
        }

        Ok(Self {
            source: parts.join(" "),
            minutes: parse_field(parts[0], Field::Minute).map_err(err)?,
            hours: parse_field(parts[1], Field::Hour).map_err(err)?,
            days_of_month: parse_field(parts[2], Field::DayOfMonth).map_err(err)?,
            months: parse_field(parts[3], Field::Month).map_err(err)?,
            days_of_week: parse_field(parts[4], Field::DayOfWeek).map_err(err)?,
            dom_restricted: !parts[2].starts_with('*'),
            dow_restricted: !parts[4].starts_with('*'),
        })
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        if !self.months.contains(date.month()) {
            return false;
        }
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// Earliest matching instant strictly after `after`, with wall-clock
    /// fields interpreted in `tz`.
    ///
    /// Local times skipped by a DST jump never match. A local time that
    /// occurs twice matches once, at its first occurrence.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let mut date = after.with_timezone(&tz).date_naive();
        for _ in 0..MAX_LOOKAHEAD_DAYS {
            if self.day_matches(date) {
                for hour in self.hours.iter(0, 23) {
                    for minute in self.minutes.iter(0, 59) {
                        let Some(naive) = date.and_hms_opt(hour, minute, 0) else {
                            continue;
                        };
                        let Some(local) = tz.from_local_datetime(&naive).earliest() else {
                            continue;
                        };
                        let instant = local.with_timezone(&Utc);
                        if instant > after {
                            return Some(instant);
                        }
                    }
                }
            }
            date = date.succ_opt()?;
        }
        None
    }
}

impl FromStr for CronExpr {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
