use chrono::{DateTime, Utc};
use reportd_core::clock::{from_storage, to_storage};
use reportd_core::{OrgId, Settings, SmtpMode};
use rusqlite::{params, OptionalExtension};
use tracing::instrument;

use crate::error::{LedgerError, Result};
use crate::ledger::Ledger;

impl Ledger {
    /// Stored settings of an organization, or `None` if never saved.
    pub fn get_settings(&self, org_id: OrgId) -> Result<Option<Settings>> {
        let db = self.conn()?;
        let row = db
            .query_row(
                "SELECT smtp_mode, smtp, renderer, limits, created_at, updated_at
                 FROM settings WHERE org_id = ?1",
                params![org_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((mode, smtp, renderer, limits, created_at, updated_at)) = row else {
            return Ok(None);
        };

        let smtp_mode = match mode.as_str() {
            "global" => SmtpMode::Global,
            "custom" => SmtpMode::Custom,
            other => return Err(LedgerError::Corrupt(format!("unknown smtp_mode: {other}"))),
        };
        let timestamp = |s: &str| from_storage(s).map_err(|e| LedgerError::Corrupt(e.to_string()));

        Ok(Some(Settings {
            org_id,
            smtp_mode,
            smtp: smtp.map(|s| serde_json::from_str(&s)).transpose()?,
            renderer: serde_json::from_str(&renderer)?,
            limits: serde_json::from_str(&limits)?,
            created_at: Some(timestamp(&created_at)?),
            updated_at: Some(timestamp(&updated_at)?),
        }))
    }

    /// Insert or replace the settings of `settings.org_id`.
    ///
    /// `created_at` is kept from the first save.
    #[instrument(skip_all, fields(org_id = settings.org_id))]
    pub fn save_settings(&self, settings: &Settings, now: DateTime<Utc>) -> Result<Settings> {
        let smtp = settings.smtp.as_ref().map(serde_json::to_string).transpose()?;
        let renderer = serde_json::to_string(&settings.renderer)?;
        let limits = serde_json::to_string(&settings.limits)?;
        let mode = match settings.smtp_mode {
            SmtpMode::Global => "global",
            SmtpMode::Custom => "custom",
        };

        {
            let db = self.conn()?;
            db.execute(
                "INSERT INTO settings (org_id, smtp_mode, smtp, renderer, limits, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(org_id) DO UPDATE SET
                     smtp_mode  = excluded.smtp_mode,
                     smtp       = excluded.smtp,
                     renderer   = excluded.renderer,
                     limits     = excluded.limits,
                     updated_at = excluded.updated_at",
                params![settings.org_id, mode, smtp, renderer, limits, to_storage(now)],
            )?;
        }

        self.get_settings(settings.org_id)?.ok_or(LedgerError::NotFound {
            kind: "settings",
            id: settings.org_id,
        })
    }
}
