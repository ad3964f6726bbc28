use chrono::{DateTime, Utc};
use reportd_core::clock::to_storage;
use reportd_core::{OrgId, Run, RunFailure, RunId, RunMetrics, RunStatus, RunTrigger, ScheduleId};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::ledger::Ledger;
use crate::rows::{row_to_run, trigger_str, RUN_COLUMNS};

/// True when SQLite rejected a write on a UNIQUE/CHECK constraint.
fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation)
}

impl Ledger {
    /// Atomically claim a scheduled firing.
    ///
    /// Moves `next_run_at` from `due_at` to `next_run_at` and inserts a
    /// `pending` run keyed by the due instant, in one transaction. Returns
    /// `None` when another dispatcher already advanced the schedule, the
    /// schedule was disabled, or a run is already in flight. Claiming the
    /// same `(schedule, due_at)` twice never creates a second run.
    #[instrument(skip_all, fields(schedule_id = schedule_id, due_at = %due_at))]
    pub fn claim_due(
        &self,
        schedule_id: ScheduleId,
        due_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<Run>> {
        let mut db = self.conn()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let moved = tx.execute(
            "UPDATE schedules SET next_run_at = ?1
             WHERE id = ?2 AND enabled = 1 AND next_run_at = ?3",
            params![next_run_at.map(to_storage), schedule_id, to_storage(due_at)],
        )?;
        if moved == 0 {
            debug!("schedule already advanced; not claimed");
            return Ok(None);
        }

        let key = format!("scheduled:{}", to_storage(due_at));
        let run_id = match insert_pending(&tx, schedule_id, RunTrigger::Scheduled, &key, now) {
            Ok(id) => id,
            Err(e) if is_constraint_violation(&e) => {
                // Dropping `tx` rolls back the next_run_at move as well.
                debug!("run already in flight or firing already claimed");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let run = load_run(&tx, run_id)?;
        tx.commit()?;
        Ok(Some(run))
    }

    /// Insert a manual run for a schedule in `org_id`.
    ///
    /// Fails with `AlreadyInFlight` if the schedule has a pending or running
    /// run. Does not touch `next_run_at`.
    #[instrument(skip_all, fields(org_id = org_id, schedule_id = schedule_id))]
    pub fn claim_manual(
        &self,
        org_id: OrgId,
        schedule_id: ScheduleId,
        now: DateTime<Utc>,
    ) -> Result<Run> {
        let mut db = self.conn()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let owned: Option<i64> = tx
            .query_row(
                "SELECT id FROM schedules WHERE org_id = ?1 AND id = ?2",
                params![org_id, schedule_id],
                |row| row.get(0),
            )
            .optional()?;
        if owned.is_none() {
            return Err(LedgerError::NotFound {
                kind: "schedule",
                id: schedule_id,
            });
        }

        let key = format!("manual:{}", Uuid::now_v7());
        let run_id = match insert_pending(&tx, schedule_id, RunTrigger::Manual, &key, now) {
            Ok(id) => id,
            Err(e) if is_constraint_violation(&e) => {
                return Err(LedgerError::AlreadyInFlight { schedule_id })
            }
            Err(e) => return Err(e.into()),
        };

        let run = load_run(&tx, run_id)?;
        tx.commit()?;
        Ok(run)
    }

    /// Fetch a run, scoped to its organization.
    pub fn get_run(&self, org_id: OrgId, id: RunId) -> Result<Run> {
        let db = self.conn()?;
        let run = load_run(&db, id)?;
        if run.org_id != org_id {
            return Err(LedgerError::NotFound { kind: "run", id });
        }
        Ok(run)
    }

    /// Fetch a run regardless of organization. Internal callers only.
    pub fn get_run_by_id(&self, id: RunId) -> Result<Run> {
        let db = self.conn()?;
        load_run(&db, id)
    }

    /// Run history of a schedule, newest first.
    pub fn list_runs(&self, org_id: OrgId, schedule_id: ScheduleId, limit: usize) -> Result<Vec<Run>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM runs
             WHERE org_id = ?1 AND schedule_id = ?2
             ORDER BY id DESC
             LIMIT ?3"
        ))?;
        let rows = stmt.query_map(params![org_id, schedule_id, limit as i64], row_to_run)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// All runs currently in `status`, oldest first.
    pub fn runs_in_status(&self, status: RunStatus) -> Result<Vec<Run>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE status = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![status.as_str()], row_to_run)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// `pending -> running`.
    #[instrument(skip_all, fields(run_id = id))]
    pub fn mark_running(&self, id: RunId, now: DateTime<Utc>) -> Result<Run> {
        let db = self.conn()?;
        let changed = db.execute(
            "UPDATE runs SET status = 'running', running_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![to_storage(now), id],
        )?;
        if changed == 0 {
            return Err(transition_error(&db, id, RunStatus::Running));
        }
        load_run(&db, id)
    }

    /// Record the artifact location on a running run.
    pub fn attach_artifact(&self, id: RunId, path: &str) -> Result<()> {
        let db = self.conn()?;
        let changed = db.execute(
            "UPDATE runs SET artifact_path = ?1 WHERE id = ?2 AND status = 'running'",
            params![path, id],
        )?;
        if changed == 0 {
            return Err(transition_error(&db, id, RunStatus::Running));
        }
        Ok(())
    }

    /// `running -> completed`, writing the success metrics.
    #[instrument(skip_all, fields(run_id = id))]
    pub fn complete_run(&self, id: RunId, metrics: &RunMetrics, now: DateTime<Utc>) -> Result<Run> {
        let mut db = self.conn()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE runs
             SET status = 'completed', finished_at = ?1,
                 rendered_pages = ?2, bytes = ?3, checksum = ?4
             WHERE id = ?5 AND status = 'running'",
            params![
                to_storage(now),
                metrics.rendered_pages as i64,
                metrics.bytes as i64,
                metrics.checksum,
                id,
            ],
        )?;
        if changed == 0 {
            return Err(transition_error(&tx, id, RunStatus::Completed));
        }
        stamp_last_run(&tx, id)?;
        let run = load_run(&tx, id)?;
        tx.commit()?;
        Ok(run)
    }

    /// `pending | running -> failed`. An artifact already attached stays.
    #[instrument(skip_all, fields(run_id = id, kind = %failure.kind))]
    pub fn fail_run(&self, id: RunId, failure: &RunFailure, now: DateTime<Utc>) -> Result<Run> {
        let mut db = self.conn()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE runs
             SET status = 'failed', finished_at = ?1, error_kind = ?2, error_text = ?3
             WHERE id = ?4 AND status IN ('pending', 'running')",
            params![
                to_storage(now),
                failure.kind.as_str(),
                failure.error_text(),
                id,
            ],
        )?;
        if changed == 0 {
            return Err(transition_error(&tx, id, RunStatus::Failed));
        }
        stamp_last_run(&tx, id)?;
        let run = load_run(&tx, id)?;
        tx.commit()?;
        Ok(run)
    }

    // -----------------------------------------------------------------------
    // Retention
    // -----------------------------------------------------------------------

    /// Organizations that still hold at least one unswept artifact.
    pub fn orgs_with_artifacts(&self) -> Result<Vec<OrgId>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT DISTINCT org_id FROM runs
             WHERE artifact_path IS NOT NULL AND artifact_swept_at IS NULL
             ORDER BY org_id",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Finished runs of `org_id` whose artifact is older than `cutoff` and
    /// has not been swept yet.
    pub fn expirable_artifacts(&self, org_id: OrgId, cutoff: DateTime<Utc>) -> Result<Vec<Run>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM runs
             WHERE org_id = ?1
               AND artifact_path IS NOT NULL
               AND artifact_swept_at IS NULL
               AND finished_at IS NOT NULL
               AND finished_at < ?2
             ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![org_id, to_storage(cutoff)], row_to_run)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Record that the artifact file of a run is gone. Idempotent.
    pub fn mark_artifact_swept(&self, id: RunId, now: DateTime<Utc>) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "UPDATE runs SET artifact_swept_at = ?1
             WHERE id = ?2 AND artifact_swept_at IS NULL",
            params![to_storage(now), id],
        )?;
        Ok(())
    }
}

fn insert_pending(
    db: &Connection,
    schedule_id: ScheduleId,
    trigger: RunTrigger,
    dispatch_key: &str,
    now: DateTime<Utc>,
) -> rusqlite::Result<RunId> {
    db.execute(
        "INSERT INTO runs (schedule_id, org_id, trigger, dispatch_key, status, format, started_at)
         SELECT id, org_id, ?1, ?2, 'pending', format, ?3 FROM schedules WHERE id = ?4",
        params![trigger_str(trigger), dispatch_key, to_storage(now), schedule_id],
    )?;
    Ok(db.last_insert_rowid())
}

fn stamp_last_run(db: &Connection, run_id: RunId) -> rusqlite::Result<()> {
    db.execute(
        "UPDATE schedules
         SET last_run_at = (SELECT started_at FROM runs WHERE id = ?1)
         WHERE id = (SELECT schedule_id FROM runs WHERE id = ?1)",
        params![run_id],
    )?;
    Ok(())
}

pub(crate) fn load_run(db: &Connection, id: RunId) -> Result<Run> {
    db.query_row(
        &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
        params![id],
        row_to_run,
    )
    .optional()?
    .ok_or(LedgerError::NotFound { kind: "run", id })
}

/// Explain why a conditional status update matched nothing.
fn transition_error(db: &Connection, id: RunId, to: RunStatus) -> LedgerError {
    let current: rusqlite::Result<Option<String>> = db
        .query_row("SELECT status FROM runs WHERE id = ?1", params![id], |row| {
            row.get(0)
        })
        .optional();
    match current {
        Ok(None) => LedgerError::NotFound { kind: "run", id },
        Ok(Some(s)) => match s.parse::<RunStatus>() {
            Ok(from) => LedgerError::InvalidTransition {
                run_id: id,
                from,
                to,
            },
            Err(e) => LedgerError::Corrupt(e),
        },
        Err(e) => LedgerError::Database(e),
    }
}
