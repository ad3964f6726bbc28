use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reportd_ledger::Ledger;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::artifacts::ArtifactStore;
use crate::error::Result;
use crate::settings::SettingsCache;

/// Outcome of one retention pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired artifacts looked at.
    pub examined: usize,
    /// Files removed by this pass.
    pub deleted: usize,
    /// Files that were already gone; recorded as swept.
    pub already_missing: usize,
    /// Deletions that errored; retried on the next pass.
    pub failed: usize,
}

/// Periodically removes artifacts older than each organization's
/// `retention_days`. Run records stay; only the file goes.
pub struct RetentionSweeper {
    ledger: Arc<Ledger>,
    store: Arc<ArtifactStore>,
    settings: Arc<SettingsCache>,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(
        ledger: Arc<Ledger>,
        store: Arc<ArtifactStore>,
        settings: Arc<SettingsCache>,
        interval: Duration,
    ) -> Self {
        Self {
            ledger,
            store,
            settings,
            interval,
        }
    }

    /// One pass over every organization. A failed deletion is logged and
    /// the pass continues.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for org_id in self.ledger.orgs_with_artifacts()? {
            let retention_days = match self.settings.get(org_id) {
                Ok(s) => s.limits.retention_days,
                Err(e) => {
                    error!(org_id, "skipping retention for org: {e}");
                    continue;
                }
            };
            let cutoff = now - chrono::Duration::days(i64::from(retention_days));

            for run in self.ledger.expirable_artifacts(org_id, cutoff)? {
                let Some(path) = run.artifact_path.as_deref() else {
                    continue;
                };
                report.examined += 1;

                match self.store.remove(Path::new(path)).await {
                    Ok(removed) => {
                        if removed {
                            report.deleted += 1;
                        } else {
                            report.already_missing += 1;
                        }
                        if let Err(e) = self.ledger.mark_artifact_swept(run.id, now) {
                            error!(run_id = run.id, "could not record swept artifact: {e}");
                        }
                        debug!(org_id, run_id = run.id, %path, removed, "artifact expired");
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(org_id, run_id = run.id, %path, "artifact deletion failed: {e}");
                    }
                }
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                deleted = report.deleted,
                already_missing = report.already_missing,
                failed = report.failed,
                "retention sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweep on the configured interval until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "retention sweeper started");
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep_once(Utc::now()).await {
                        error!("retention sweep error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("retention sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }
}
