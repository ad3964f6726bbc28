use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use reportd_core::clock::to_storage;
use reportd_core::{OrgId, Schedule, ScheduleDraft, ScheduleId};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, instrument};

use crate::db::init_db;
use crate::error::{LedgerError, Result};
use crate::rows::{row_to_schedule, SCHEDULE_COLUMNS};

/// Durable store for schedules, runs and per-org settings.
///
/// Wraps a single SQLite connection in a `Mutex`. Every state change is one
/// statement or one `IMMEDIATE` transaction, so the ledger stays consistent
/// with several executors writing concurrently.
pub struct Ledger {
    db: Mutex<Connection>,
}

impl Ledger {
    /// Wrap an open connection and make sure the schema exists.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Fresh in-memory ledger, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| LedgerError::Poisoned)
    }

    // -----------------------------------------------------------------------
    // Schedules
    // -----------------------------------------------------------------------

    /// Insert a new schedule owned by `owner_user_id`.
    #[instrument(skip_all, fields(org_id = org_id, name = %draft.name))]
    pub fn create_schedule(
        &self,
        org_id: OrgId,
        owner_user_id: i64,
        draft: &ScheduleDraft,
        next_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Schedule> {
        let variables = serde_json::to_string(&draft.variables)?;
        let recipients = serde_json::to_string(&draft.recipients)?;
        let now = to_storage(now);

        let db = self.conn()?;
        db.execute(
            "INSERT INTO schedules
             (org_id, name, dashboard_uid, dashboard_title, range_from, range_to,
              interval_type, cron_expr, timezone, format, variables, recipients,
              email_subject, email_body, enabled, next_run_at, owner_user_id,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                     ?16, ?17, ?18, ?18)",
            params![
                org_id,
                draft.name,
                draft.dashboard_uid,
                draft.dashboard_title,
                draft.time_range.from,
                draft.time_range.to,
                draft.recurrence.interval_type(),
                draft.recurrence.cron_expr(),
                draft.timezone,
                draft.format.extension(),
                variables,
                recipients,
                draft.email_subject,
                draft.email_body,
                draft.enabled as i64,
                next_run_at.map(to_storage),
                owner_user_id,
                now,
            ],
        )?;
        let id = db.last_insert_rowid();
        debug!(schedule_id = id, "schedule created");
        load_schedule(&db, org_id, id)
    }

    /// Fetch a schedule, scoped to its organization.
    pub fn get_schedule(&self, org_id: OrgId, id: ScheduleId) -> Result<Schedule> {
        let db = self.conn()?;
        load_schedule(&db, org_id, id)
    }

    /// All schedules of an organization, newest first.
    pub fn list_schedules(&self, org_id: OrgId) -> Result<Vec<Schedule>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules
             WHERE org_id = ?1
             ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map(params![org_id], row_to_schedule)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Replace the user-editable fields of a schedule.
    #[instrument(skip_all, fields(org_id = org_id, schedule_id = id))]
    pub fn update_schedule(
        &self,
        org_id: OrgId,
        id: ScheduleId,
        draft: &ScheduleDraft,
        next_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Schedule> {
        let variables = serde_json::to_string(&draft.variables)?;
        let recipients = serde_json::to_string(&draft.recipients)?;

        let db = self.conn()?;
        let changed = db.execute(
            "UPDATE schedules
             SET name = ?1, dashboard_uid = ?2, dashboard_title = ?3,
                 range_from = ?4, range_to = ?5, interval_type = ?6, cron_expr = ?7,
                 timezone = ?8, format = ?9, variables = ?10, recipients = ?11,
                 email_subject = ?12, email_body = ?13, enabled = ?14,
                 next_run_at = ?15, updated_at = ?16
             WHERE org_id = ?17 AND id = ?18",
            params![
                draft.name,
                draft.dashboard_uid,
                draft.dashboard_title,
                draft.time_range.from,
                draft.time_range.to,
                draft.recurrence.interval_type(),
                draft.recurrence.cron_expr(),
                draft.timezone,
                draft.format.extension(),
                variables,
                recipients,
                draft.email_subject,
                draft.email_body,
                draft.enabled as i64,
                next_run_at.map(to_storage),
                to_storage(now),
                org_id,
                id,
            ],
        )?;
        if changed == 0 {
            return Err(LedgerError::NotFound { kind: "schedule", id });
        }
        load_schedule(&db, org_id, id)
    }

    /// Delete a schedule and its run history.
    ///
    /// Returns the artifact paths that were still on disk so the caller can
    /// remove them. Refuses while a run is pending or running.
    #[instrument(skip_all, fields(org_id = org_id, schedule_id = id))]
    pub fn delete_schedule(&self, org_id: OrgId, id: ScheduleId) -> Result<Vec<String>> {
        let mut db = self.conn()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT id FROM schedules WHERE org_id = ?1 AND id = ?2",
                params![org_id, id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(LedgerError::NotFound { kind: "schedule", id });
        }

        let in_flight: i64 = tx.query_row(
            "SELECT COUNT(*) FROM runs
             WHERE schedule_id = ?1 AND status IN ('pending', 'running')",
            params![id],
            |row| row.get(0),
        )?;
        if in_flight > 0 {
            return Err(LedgerError::AlreadyInFlight { schedule_id: id });
        }

        let paths = {
            let mut stmt = tx.prepare(
                "SELECT artifact_path FROM runs
                 WHERE schedule_id = ?1
                   AND artifact_path IS NOT NULL AND artifact_swept_at IS NULL",
            )?;
            let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        // Explicit delete keeps history removal independent of the
        // connection's foreign_keys pragma.
        tx.execute("DELETE FROM runs WHERE schedule_id = ?1", params![id])?;
        tx.execute("DELETE FROM schedules WHERE id = ?1", params![id])?;
        tx.commit()?;
        debug!(artifacts = paths.len(), "schedule deleted");
        Ok(paths)
    }

    /// Enabled schedules whose `next_run_at` has passed and that have no
    /// run in flight, oldest due first.
    pub fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules s
             WHERE s.enabled = 1
               AND s.next_run_at IS NOT NULL
               AND s.next_run_at <= ?1
               AND NOT EXISTS (
                   SELECT 1 FROM runs r
                   WHERE r.schedule_id = s.id AND r.status IN ('pending', 'running')
               )
             ORDER BY s.next_run_at ASC, s.id ASC"
        ))?;
        let rows = stmt.query_map(params![to_storage(now)], row_to_schedule)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Enabled schedules that have never been given a next fire time.
    pub fn schedules_missing_next_run(&self) -> Result<Vec<Schedule>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules
             WHERE enabled = 1 AND next_run_at IS NULL
             ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map([], row_to_schedule)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Overwrite `next_run_at` unconditionally.
    pub fn set_next_run(&self, id: ScheduleId, next_run_at: Option<DateTime<Utc>>) -> Result<()> {
        let db = self.conn()?;
        let changed = db.execute(
            "UPDATE schedules SET next_run_at = ?1 WHERE id = ?2",
            params![next_run_at.map(to_storage), id],
        )?;
        if changed == 0 {
            return Err(LedgerError::NotFound { kind: "schedule", id });
        }
        Ok(())
    }
}

pub(crate) fn load_schedule(db: &Connection, org_id: OrgId, id: ScheduleId) -> Result<Schedule> {
    db.query_row(
        &format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE org_id = ?1 AND id = ?2"),
        params![org_id, id],
        row_to_schedule,
    )
    .optional()?
    .ok_or(LedgerError::NotFound { kind: "schedule", id })
}
