//! Row <-> domain mapping.

use chrono::{DateTime, Utc};
use reportd_core::clock;
use reportd_core::{Recurrence, Run, Schedule, TimeRange};
use rusqlite::types::Type;
use rusqlite::Row;

pub(crate) const SCHEDULE_COLUMNS: &str = "id, org_id, name, dashboard_uid, dashboard_title,
    range_from, range_to, interval_type, cron_expr, timezone, format, variables, recipients,
    email_subject, email_body, enabled, last_run_at, next_run_at, owner_user_id,
    created_at, updated_at";

pub(crate) const RUN_COLUMNS: &str = "id, schedule_id, org_id, trigger, status, started_at,
    running_at, finished_at, error_kind, error_text, artifact_path, artifact_swept_at,
    format, rendered_pages, bytes, checksum";

fn corrupt<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::fmt::Display,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.to_string().into())
}

fn ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    clock::from_storage(&raw).map_err(|e| corrupt(idx, e))
}

fn opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| clock::from_storage(&s).map_err(|e| corrupt(idx, e)))
        .transpose()
}

fn json<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| corrupt(idx, e))
}

fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| corrupt(idx, e))
}

/// Map a row selected with [`SCHEDULE_COLUMNS`] to a `Schedule`.
pub(crate) fn row_to_schedule(row: &Row<'_>) -> rusqlite::Result<Schedule> {
    let interval_type: String = row.get(7)?;
    let cron_expr: Option<String> = row.get(8)?;
    let recurrence =
        Recurrence::from_columns(&interval_type, cron_expr).map_err(|e| corrupt(7, e))?;

    Ok(Schedule {
        id: row.get(0)?,
        org_id: row.get(1)?,
        name: row.get(2)?,
        dashboard_uid: row.get(3)?,
        dashboard_title: row.get(4)?,
        time_range: TimeRange {
            from: row.get(5)?,
            to: row.get(6)?,
        },
        recurrence,
        timezone: row.get(9)?,
        format: parsed(row, 10)?,
        variables: json(row, 11)?,
        recipients: json(row, 12)?,
        email_subject: row.get(13)?,
        email_body: row.get(14)?,
        enabled: row.get::<_, i64>(15)? != 0,
        last_run_at: opt_ts(row, 16)?,
        next_run_at: opt_ts(row, 17)?,
        owner_user_id: row.get(18)?,
        created_at: ts(row, 19)?,
        updated_at: ts(row, 20)?,
    })
}

/// Map a row selected with [`RUN_COLUMNS`] to a `Run`.
pub(crate) fn row_to_run(row: &Row<'_>) -> rusqlite::Result<Run> {
    let trigger: String = row.get(3)?;
    let trigger = match trigger.as_str() {
        "scheduled" => reportd_core::RunTrigger::Scheduled,
        "manual" => reportd_core::RunTrigger::Manual,
        other => return Err(corrupt(3, format!("unknown trigger: {other}"))),
    };

    Ok(Run {
        id: row.get(0)?,
        schedule_id: row.get(1)?,
        org_id: row.get(2)?,
        trigger,
        status: parsed(row, 4)?,
        started_at: ts(row, 5)?,
        running_at: opt_ts(row, 6)?,
        finished_at: opt_ts(row, 7)?,
        error_kind: row.get(8)?,
        error_text: row.get(9)?,
        artifact_path: row.get(10)?,
        artifact_swept_at: opt_ts(row, 11)?,
        format: parsed(row, 12)?,
        rendered_pages: row.get::<_, i64>(13)? as u32,
        bytes: row.get::<_, i64>(14)? as u64,
        checksum: row.get(15)?,
    })
}

pub(crate) fn trigger_str(trigger: reportd_core::RunTrigger) -> &'static str {
    match trigger {
        reportd_core::RunTrigger::Scheduled => "scheduled",
        reportd_core::RunTrigger::Manual => "manual",
    }
}
