use chrono::{DateTime, Datelike, Duration, Months, NaiveDateTime, Timelike, Utc};
use chrono_tz::Tz;
use reportd_core::clock::{localize, parse_timezone};
use reportd_core::Recurrence;

use crate::cron::CronExpr;
use crate::error::{Result, SchedulerError};

/// Compute the first fire time strictly after `after`.
///
/// Fixed intervals are anchored to `anchor` (the schedule's creation
/// instant): the local time-of-day of the anchor in `timezone` is kept
/// across DST shifts, so an 08:00 schedule always fires at 08:00 local.
/// Monthly schedules anchored on the 29th-31st fire on the last day of
/// shorter months.
///
/// Firings missed while the process was down are not replayed: the result
/// is always the next instant after `after`.
pub fn compute_next_run(
    recurrence: &Recurrence,
    timezone: &str,
    anchor: DateTime<Utc>,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    let tz = parse_timezone(timezone)
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;

    match recurrence {
        Recurrence::Daily => Ok(next_fixed(Step::Days(1), tz, anchor, after)),
        Recurrence::Weekly => Ok(next_fixed(Step::Days(7), tz, anchor, after)),
        Recurrence::Monthly => Ok(next_fixed(Step::Months, tz, anchor, after)),
        Recurrence::Cron { cron_expr } => {
            let cron = CronExpr::parse(cron_expr)
                .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;
            Ok(cron.next_after(after, tz))
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Days(i64),
    Months,
}

impl Step {
    /// The `k`-th occurrence after the anchor, in local wall-clock time.
    fn nth(self, anchor: NaiveDateTime, k: u32) -> Option<NaiveDateTime> {
        match self {
            Step::Days(d) => anchor.checked_add_signed(Duration::days(d * i64::from(k))),
            Step::Months => anchor.checked_add_months(Months::new(k)),
        }
    }

    /// A lower bound for the first `k` whose occurrence may exceed `after`.
    fn estimate(self, anchor: NaiveDateTime, after: NaiveDateTime) -> u32 {
        let k = match self {
            Step::Days(d) => (after - anchor).num_days() / d,
            Step::Months => {
                let months = |t: NaiveDateTime| i64::from(t.year()) * 12 + i64::from(t.month0());
                months(after) - months(anchor) - 1
            }
        };
        // Step back one to absorb DST offsets between anchor and `after`.
        u32::try_from(k - 1).unwrap_or(0).max(1)
    }
}

fn next_fixed(
    step: Step,
    tz: Tz,
    anchor: DateTime<Utc>,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    // Whole minutes only; the creation instant carries seconds.
    let anchor_local = anchor.with_timezone(&tz).naive_local();
    let anchor_local = anchor_local
        .date()
        .and_hms_opt(anchor_local.hour(), anchor_local.minute(), 0)?;
    let after_local = after.with_timezone(&tz).naive_local();

    let mut k = step.estimate(anchor_local, after_local);
    // A handful of iterations always suffices once `k` is estimated.
    for _ in 0..64 {
        let local = step.nth(anchor_local, k)?;
        if let Some(instant) = localize(tz, local) {
            let instant = instant.with_timezone(&Utc);
            if instant > after {
                return Some(instant);
            }
        }
        k += 1;
    }
    None
}

/// Validate a recurrence: parseable, and able to fire at least once.
pub fn validate_recurrence(recurrence: &Recurrence, timezone: &str, now: DateTime<Utc>) -> Result<()> {
    match compute_next_run(recurrence, timezone, now, now)? {
        Some(_) => Ok(()),
        None => Err(SchedulerError::InvalidSchedule(format!(
            "schedule '{}' never fires",
            recurrence.cron_expr().unwrap_or(recurrence.interval_type())
        ))),
    }
}
