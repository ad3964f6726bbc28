use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use reportd_core::clock::parse_timezone;
use reportd_core::template::{attachment_name, TemplateVars, DEFAULT_SUBJECT};
use reportd_core::timerange::ResolvedRange;
use reportd_core::{
    FailureKind, RendererSettings, Run, RunFailure, RunId, RunMetrics, RunStatus, Schedule,
    SmtpSettings,
};
use reportd_ledger::Ledger;
use reportd_mail::{resolve_smtp, Mailer, ReportAttachment, ReportEmail};
use reportd_render::{RenderError, RenderOutput, RenderRequest, Renderer};
use tracing::{error, info, instrument, warn};

use crate::artifacts::ArtifactStore;
use crate::error::Result;
use crate::gate::{ConcurrencyGate, GatePermit};
use crate::settings::SettingsCache;

/// Body used when a schedule leaves its body empty.
pub const DEFAULT_BODY: &str =
    "<p>{{schedule.name}} ({{dashboard.title}}) for {{timerange}} is attached.</p>";

/// Drives one run from `pending` to a terminal state.
///
/// Every execution-time failure is recorded on the run; `execute` only
/// returns `Err` when the ledger itself cannot be written.
pub struct RunExecutor {
    ledger: Arc<Ledger>,
    store: Arc<ArtifactStore>,
    renderer: Arc<dyn Renderer>,
    mailer: Arc<dyn Mailer>,
    settings: Arc<SettingsCache>,
    gate: Arc<ConcurrencyGate>,
    global_smtp: Option<SmtpSettings>,
}

fn internal(e: impl Display) -> RunFailure {
    RunFailure::new(FailureKind::Internal, e.to_string())
}

impl RunExecutor {
    pub fn new(
        ledger: Arc<Ledger>,
        store: Arc<ArtifactStore>,
        renderer: Arc<dyn Renderer>,
        mailer: Arc<dyn Mailer>,
        settings: Arc<SettingsCache>,
        gate: Arc<ConcurrencyGate>,
        global_smtp: Option<SmtpSettings>,
    ) -> Self {
        Self {
            ledger,
            store,
            renderer,
            mailer,
            settings,
            gate,
            global_smtp,
        }
    }

    /// Execute a pending run. Runs in any other state are left alone.
    #[instrument(skip(self))]
    pub async fn execute(&self, run_id: RunId) -> Result<Run> {
        let run = self.ledger.get_run_by_id(run_id)?;
        if run.status != RunStatus::Pending {
            warn!(status = %run.status, "run is not pending; skipping");
            return Ok(run);
        }

        // The slot is held until the terminal state is written.
        let mut permit = None;
        let outcome = self.attempt(&run, &mut permit).await;
        let finished = match outcome {
            Ok(metrics) => match self.ledger.complete_run(run.id, &metrics, Utc::now()) {
                Ok(run) => {
                    info!(
                        schedule_id = run.schedule_id,
                        pages = run.rendered_pages,
                        bytes = run.bytes,
                        "run completed"
                    );
                    run
                }
                Err(e) => {
                    error!(schedule_id = run.schedule_id, "could not record completion: {e}");
                    let failure = RunFailure::new(
                        FailureKind::Internal,
                        format!("report delivered but completion could not be recorded: {e}"),
                    );
                    // Leave nothing in `running`; if this write fails too, recovery handles it.
                    match self.ledger.fail_run(run.id, &failure, Utc::now()) {
                        Ok(run) => run,
                        Err(_) => return Err(e.into()),
                    }
                }
            },
            Err(failure) => {
                warn!(
                    schedule_id = run.schedule_id,
                    kind = %failure.kind,
                    "run failed: {}",
                    failure.message
                );
                self.ledger.fail_run(run.id, &failure, Utc::now())?
            }
        };
        drop(permit);
        Ok(finished)
    }

    async fn attempt(
        &self,
        run: &Run,
        permit: &mut Option<GatePermit>,
    ) -> std::result::Result<RunMetrics, RunFailure> {
        let schedule = self
            .ledger
            .get_schedule(run.org_id, run.schedule_id)
            .map_err(internal)?;
        let settings = self.settings.get(run.org_id).map_err(internal)?;
        let limits = settings.limits;

        let recipients = schedule.recipients.count();
        if recipients > limits.max_recipients as usize {
            return Err(RunFailure::new(
                FailureKind::LimitExceeded,
                format!(
                    "{recipients} recipients exceeds the limit of {}",
                    limits.max_recipients
                ),
            ));
        }

        let slot = self
            .gate
            .acquire(run.org_id, limits.max_concurrent_renders)
            .await
            .map_err(|e| RunFailure::new(FailureKind::ConcurrencyExhausted, e.to_string()))?;
        *permit = Some(slot);

        let running = self
            .ledger
            .mark_running(run.id, Utc::now())
            .map_err(internal)?;
        let started = running.running_at.unwrap_or(running.started_at);

        let tz = parse_timezone(&schedule.timezone).map_err(internal)?;
        let range = schedule.time_range.resolve(started, tz).map_err(internal)?;

        let request = RenderRequest {
            org_id: run.org_id,
            dashboard_uid: schedule.dashboard_uid.clone(),
            range,
            timezone: schedule.timezone.clone(),
            variables: schedule.variables.clone(),
            format: schedule.format,
        };
        let output = self.render(&request, &settings.renderer).await?;

        let size = output.bytes.len() as u64;
        if size > limits.max_attachment_bytes() {
            return Err(RunFailure::new(
                FailureKind::LimitExceeded,
                format!(
                    "rendered report is {size} bytes, above the {} MB attachment limit",
                    limits.max_attachment_size_mb
                ),
            ));
        }

        let stored = self
            .store
            .write(run.org_id, run.id, schedule.format, &output.bytes)
            .await
            .map_err(|e| RunFailure::new(FailureKind::Artifact, e.to_string()))?;
        self.ledger
            .attach_artifact(run.id, &stored.path.to_string_lossy())
            .map_err(internal)?;

        let smtp = resolve_smtp(&settings, self.global_smtp.as_ref())?;
        let email = compose_email(&schedule, tz, &range, started, output.bytes);
        let ack = self.mailer.send(&smtp, &email).await?;
        info!(recipients = ack.recipients, code = %ack.code, "report delivered");

        Ok(RunMetrics {
            rendered_pages: output.page_count,
            bytes: stored.bytes,
            checksum: stored.checksum,
        })
    }

    /// Render under the org timeout, retrying once on a transport failure.
    async fn render(
        &self,
        request: &RenderRequest,
        settings: &RendererSettings,
    ) -> std::result::Result<RenderOutput, RenderError> {
        let budget = Duration::from_millis(settings.timeout_ms);
        let mut retried = false;
        loop {
            let result = match tokio::time::timeout(budget, self.renderer.render(request, settings)).await {
                Ok(result) => result,
                Err(_) => Err(RenderError::Timeout {
                    after_ms: settings.timeout_ms,
                }),
            };
            match result {
                Err(e) if e.is_retryable() && !retried => {
                    warn!(renderer = self.renderer.name(), "render failed, retrying once: {e}");
                    retried = true;
                }
                other => return other,
            }
        }
    }
}

fn compose_email(
    schedule: &Schedule,
    tz: Tz,
    range: &ResolvedRange,
    started: chrono::DateTime<Utc>,
    bytes: Vec<u8>,
) -> ReportEmail {
    let local_start = started.with_timezone(&tz);
    let vars = TemplateVars::new(
        &schedule.name,
        schedule.display_title(),
        &range.describe(tz),
        &local_start.format("%Y-%m-%d %H:%M %Z").to_string(),
    );

    let subject = match schedule.email_subject.trim() {
        "" => DEFAULT_SUBJECT,
        s => s,
    };
    let body = match schedule.email_body.trim() {
        "" => DEFAULT_BODY,
        b => b,
    };

    ReportEmail {
        to: schedule.recipients.to.clone(),
        cc: schedule.recipients.cc.clone(),
        bcc: schedule.recipients.bcc.clone(),
        subject: vars.render(subject),
        body: vars.render(body),
        attachment: ReportAttachment {
            file_name: attachment_name(
                &schedule.name,
                &local_start.format("%Y-%m-%d-%H%M%S").to_string(),
                schedule.format.extension(),
            ),
            content_type: schedule.format.content_type().to_string(),
            bytes,
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{DateTime, TimeZone};
    use reportd_core::{Recipients, Recurrence, ReportFormat, TimeRange};

    use super::*;

    fn schedule() -> Schedule {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Schedule {
            id: 1,
            org_id: 1,
            name: "Weekly ops/summary".into(),
            dashboard_uid: "ops".into(),
            dashboard_title: Some("Operations".into()),
            time_range: TimeRange::default(),
            recurrence: Recurrence::Weekly,
            timezone: "UTC".into(),
            format: ReportFormat::Pdf,
            variables: BTreeMap::new(),
            recipients: Recipients {
                to: vec!["ops@example.com".into()],
                cc: vec![],
                bcc: vec![],
            },
            email_subject: String::new(),
            email_body: "Hi, {{dashboard.title}} from {{run.started_at}}".into(),
            enabled: true,
            last_run_at: None,
            next_run_at: None,
            owner_user_id: 1,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn email_interpolates_templates() {
        let started: DateTime<Utc> = Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap();
        let range = ResolvedRange {
            from: started - chrono::Duration::hours(24),
            to: started,
        };
        let email = compose_email(&schedule(), Tz::UTC, &range, started, b"%PDF".to_vec());

        assert_eq!(email.subject, "Report: Weekly ops/summary");
        assert_eq!(email.body, "Hi, Operations from 2024-02-03 04:05 UTC");
        assert_eq!(
            email.attachment.file_name,
            "Weekly_ops_summary-2024-02-03-040506.pdf"
        );
        assert_eq!(email.attachment.content_type, "application/pdf");
    }
}
