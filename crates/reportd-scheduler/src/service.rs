use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reportd_core::{
    OrgId, ReportFormat, ReportdError, Result, Run, RunId, Schedule, ScheduleDraft, ScheduleId,
};
use reportd_ledger::Ledger;
use tracing::{info, warn};

use crate::artifacts::ArtifactStore;
use crate::dispatch::{Dispatcher, RunTicket};
use crate::schedule::{compute_next_run, validate_recurrence};
use crate::settings::SettingsCache;

/// Default and ceiling for run-history page sizes.
pub const DEFAULT_RUN_LIMIT: usize = 50;
pub const MAX_RUN_LIMIT: usize = 500;

/// Artifact bytes plus what a download response needs.
#[derive(Debug, Clone)]
pub struct ArtifactDownload {
    pub run_id: RunId,
    pub format: ReportFormat,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Synchronous front door for schedules and runs.
///
/// Everything that can be rejected up front is rejected here, before a
/// schedule is stored or a run is claimed.
pub struct ScheduleService {
    ledger: Arc<Ledger>,
    store: Arc<ArtifactStore>,
    settings: Arc<SettingsCache>,
    dispatcher: Dispatcher,
}

impl ScheduleService {
    pub fn new(
        ledger: Arc<Ledger>,
        store: Arc<ArtifactStore>,
        settings: Arc<SettingsCache>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            ledger,
            store,
            settings,
            dispatcher,
        }
    }

    fn validate(&self, org_id: OrgId, draft: &ScheduleDraft, now: DateTime<Utc>) -> Result<()> {
        if draft.name.trim().is_empty() {
            return Err(ReportdError::Validation("name must not be empty".into()));
        }
        if draft.dashboard_uid.trim().is_empty() {
            return Err(ReportdError::Validation(
                "dashboard_uid must not be empty".into(),
            ));
        }

        let recipients = &draft.recipients;
        if recipients.to.is_empty() {
            return Err(ReportdError::Validation(
                "at least one 'to' recipient is required".into(),
            ));
        }
        if let Some(blank) = recipients
            .to
            .iter()
            .chain(&recipients.cc)
            .chain(&recipients.bcc)
            .find(|a| a.trim().is_empty())
        {
            return Err(ReportdError::Validation(format!(
                "recipient address '{blank}' is empty"
            )));
        }
        self.check_recipient_limit(org_id, recipients.count())?;

        validate_recurrence(&draft.recurrence, &draft.timezone, now)?;
        draft.time_range.validate()
    }

    fn check_recipient_limit(&self, org_id: OrgId, count: usize) -> Result<()> {
        let max = self.settings.get(org_id)?.limits.max_recipients;
        if count > max as usize {
            return Err(ReportdError::LimitExceeded(format!(
                "{count} recipients exceeds the limit of {max}"
            )));
        }
        Ok(())
    }

    fn first_run(
        draft: &ScheduleDraft,
        anchor: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        if !draft.enabled {
            return Ok(None);
        }
        Ok(compute_next_run(&draft.recurrence, &draft.timezone, anchor, now)?)
    }

    pub fn create(&self, org_id: OrgId, owner_user_id: i64, draft: ScheduleDraft) -> Result<Schedule> {
        let now = Utc::now();
        self.validate(org_id, &draft, now)?;
        let next = Self::first_run(&draft, now, now)?;
        let schedule = self
            .ledger
            .create_schedule(org_id, owner_user_id, &draft, next, now)?;
        info!(
            org_id,
            schedule_id = schedule.id,
            interval = schedule.recurrence.interval_type(),
            next_run_at = ?schedule.next_run_at,
            "schedule created"
        );
        Ok(schedule)
    }

    /// Replace a schedule. `next_run_at` is recomputed only when the
    /// recurrence, timezone or enabled flag changed.
    pub fn update(&self, org_id: OrgId, id: ScheduleId, draft: ScheduleDraft) -> Result<Schedule> {
        let now = Utc::now();
        let existing = self.ledger.get_schedule(org_id, id)?;
        self.validate(org_id, &draft, now)?;

        let timing_changed = existing.recurrence != draft.recurrence
            || existing.timezone != draft.timezone
            || existing.enabled != draft.enabled
            || existing.next_run_at.is_none();
        let next = if timing_changed {
            Self::first_run(&draft, existing.created_at, now)?
        } else {
            existing.next_run_at
        };

        let schedule = self.ledger.update_schedule(org_id, id, &draft, next, now)?;
        info!(org_id, schedule_id = id, next_run_at = ?schedule.next_run_at, "schedule updated");
        Ok(schedule)
    }

    /// Delete a schedule, its run history and its remaining artifacts.
    pub async fn delete(&self, org_id: OrgId, id: ScheduleId) -> Result<()> {
        let paths = self.ledger.delete_schedule(org_id, id)?;
        for path in &paths {
            if let Err(e) = self.store.remove(Path::new(path)).await {
                warn!(schedule_id = id, %path, "artifact left behind: {e}");
            }
        }
        info!(org_id, schedule_id = id, artifacts = paths.len(), "schedule deleted");
        Ok(())
    }

    pub fn get(&self, org_id: OrgId, id: ScheduleId) -> Result<Schedule> {
        Ok(self.ledger.get_schedule(org_id, id)?)
    }

    pub fn list(&self, org_id: OrgId) -> Result<Vec<Schedule>> {
        Ok(self.ledger.list_schedules(org_id)?)
    }

    /// Claim a manual run and hand it to the workers. Returns as soon as the
    /// run is queued; its outcome shows up in the run history.
    pub async fn trigger(&self, org_id: OrgId, id: ScheduleId) -> Result<Run> {
        let schedule = self.ledger.get_schedule(org_id, id)?;
        self.check_recipient_limit(org_id, schedule.recipients.count())?;

        let run = self.ledger.claim_manual(org_id, id, Utc::now())?;
        self.dispatcher
            .submit(RunTicket {
                run_id: run.id,
                schedule_id: run.schedule_id,
                org_id,
            })
            .await?;
        info!(org_id, schedule_id = id, run_id = run.id, "manual run queued");
        Ok(run)
    }

    /// Run history of a schedule, newest first.
    pub fn runs(&self, org_id: OrgId, id: ScheduleId, limit: Option<usize>) -> Result<Vec<Run>> {
        self.ledger.get_schedule(org_id, id)?;
        let limit = limit.unwrap_or(DEFAULT_RUN_LIMIT).clamp(1, MAX_RUN_LIMIT);
        Ok(self.ledger.list_runs(org_id, id, limit)?)
    }

    pub fn get_run(&self, org_id: OrgId, id: RunId) -> Result<Run> {
        Ok(self.ledger.get_run(org_id, id)?)
    }

    /// Fetch the artifact of a run. `NotFound` says whether the run never
    /// produced one or its file has expired.
    pub async fn artifact(&self, org_id: OrgId, run_id: RunId) -> Result<ArtifactDownload> {
        let run = self.ledger.get_run(org_id, run_id)?;
        let Some(path) = run.artifact_path.as_deref() else {
            return Err(ReportdError::not_found(
                "artifact",
                format!("{run_id} (never rendered)"),
            ));
        };
        let expired = || ReportdError::not_found("artifact", format!("{run_id} (expired)"));
        if run.artifact_swept_at.is_some() {
            return Err(expired());
        }

        let bytes = self.store.read(Path::new(path)).await?.ok_or_else(expired)?;
        let file_name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("run_{run_id}.{}", run.format.extension()));
        Ok(ArtifactDownload {
            run_id,
            format: run.format,
            file_name,
            bytes,
        })
    }
}
