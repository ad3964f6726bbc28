use rusqlite::Connection;

use crate::error::Result;

/// Initialise the ledger schema in `conn`. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    create_schedules_table(conn)?;
    create_runs_table(conn)?;
    create_settings_table(conn)?;
    Ok(())
}

fn create_schedules_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schedules (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            org_id          INTEGER NOT NULL,
            name            TEXT    NOT NULL,
            dashboard_uid   TEXT    NOT NULL,
            dashboard_title TEXT,
            range_from      TEXT    NOT NULL,
            range_to        TEXT    NOT NULL,
            interval_type   TEXT    NOT NULL,   -- daily | weekly | monthly | cron
            cron_expr       TEXT,               -- set iff interval_type = 'cron'
            timezone        TEXT    NOT NULL,
            format          TEXT    NOT NULL,   -- pdf | html
            variables       TEXT    NOT NULL DEFAULT '{}',
            recipients      TEXT    NOT NULL,
            email_subject   TEXT    NOT NULL,
            email_body      TEXT    NOT NULL,
            enabled         INTEGER NOT NULL DEFAULT 1,
            last_run_at     TEXT,
            next_run_at     TEXT,
            owner_user_id   INTEGER NOT NULL,
            created_at      TEXT    NOT NULL,
            updated_at      TEXT    NOT NULL,
            CHECK ((interval_type = 'cron') = (cron_expr IS NOT NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_schedules_org ON schedules (org_id);
        -- Tick query: WHERE enabled = 1 AND next_run_at <= ?
        CREATE INDEX IF NOT EXISTS idx_schedules_due ON schedules (enabled, next_run_at);
        ",
    )?;
    Ok(())
}

fn create_runs_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS runs (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            schedule_id       INTEGER NOT NULL REFERENCES schedules (id) ON DELETE CASCADE,
            org_id            INTEGER NOT NULL,
            trigger           TEXT    NOT NULL,   -- scheduled | manual
            dispatch_key      TEXT    NOT NULL,
            status            TEXT    NOT NULL DEFAULT 'pending',
            format            TEXT    NOT NULL,
            started_at        TEXT    NOT NULL,
            running_at        TEXT,
            finished_at       TEXT,
            error_kind        TEXT,
            error_text        TEXT,
            artifact_path     TEXT,
            artifact_swept_at TEXT,
            rendered_pages    INTEGER NOT NULL DEFAULT 0,
            bytes             INTEGER NOT NULL DEFAULT 0,
            checksum          TEXT,
            UNIQUE (schedule_id, dispatch_key)
        );

        CREATE INDEX IF NOT EXISTS idx_runs_schedule ON runs (org_id, schedule_id, id);
        CREATE INDEX IF NOT EXISTS idx_runs_status ON runs (status);

        -- Single-flight: at most one non-terminal run per schedule.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_runs_single_flight
            ON runs (schedule_id) WHERE status IN ('pending', 'running');

        -- Retention sweep: finished runs whose artifact is still on disk.
        CREATE INDEX IF NOT EXISTS idx_runs_retention
            ON runs (org_id, finished_at)
            WHERE artifact_path IS NOT NULL AND artifact_swept_at IS NULL;
        ",
    )?;
    Ok(())
}

fn create_settings_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS settings (
            org_id     INTEGER NOT NULL PRIMARY KEY,
            smtp_mode  TEXT    NOT NULL,
            smtp       TEXT,               -- JSON SmtpSettings or NULL
            renderer   TEXT    NOT NULL,   -- JSON RendererSettings
            limits     TEXT    NOT NULL,   -- JSON Limits
            created_at TEXT    NOT NULL,
            updated_at TEXT    NOT NULL
        );
        ",
    )?;
    Ok(())
}
