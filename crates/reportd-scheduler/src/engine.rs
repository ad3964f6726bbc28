use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reportd_core::{FailureKind, RunFailure, RunStatus, Schedule};
use reportd_ledger::Ledger;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::dispatch::{Dispatcher, RunTicket};
use crate::error::Result;
use crate::schedule::compute_next_run;

/// What start-up recovery found.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Runs left `running` by a previous process, now failed.
    pub interrupted: usize,
    /// Runs left `pending`, handed to the dispatcher again.
    pub resubmitted: usize,
    /// Enabled schedules that had no `next_run_at`.
    pub rescheduled: usize,
}

/// The tick loop: finds due schedules, claims one run per due firing and
/// hands it to the dispatcher.
pub struct SchedulerEngine {
    ledger: Arc<Ledger>,
    dispatcher: Dispatcher,
    tick: Duration,
}

fn ticket(run: &reportd_core::Run) -> RunTicket {
    RunTicket {
        run_id: run.id,
        schedule_id: run.schedule_id,
        org_id: run.org_id,
    }
}

fn next_for(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match compute_next_run(&schedule.recurrence, &schedule.timezone, schedule.created_at, after) {
        Ok(next) => next,
        Err(e) => {
            error!(schedule_id = schedule.id, "cannot compute next run: {e}");
            None
        }
    }
}

impl SchedulerEngine {
    pub fn new(ledger: Arc<Ledger>, dispatcher: Dispatcher, tick: Duration) -> Self {
        Self {
            ledger,
            dispatcher,
            tick,
        }
    }

    /// Bring the ledger back to a consistent state after a restart.
    pub async fn recover(&self, now: DateTime<Utc>) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        let interrupted = RunFailure::new(
            FailureKind::Interrupted,
            "process stopped while the run was in progress",
        );
        for run in self.ledger.runs_in_status(RunStatus::Running)? {
            self.ledger.fail_run(run.id, &interrupted, now)?;
            report.interrupted += 1;
        }

        for run in self.ledger.runs_in_status(RunStatus::Pending)? {
            self.dispatcher.submit(ticket(&run)).await?;
            report.resubmitted += 1;
        }

        for schedule in self.ledger.schedules_missing_next_run()? {
            if let Some(next) = next_for(&schedule, now) {
                self.ledger.set_next_run(schedule.id, Some(next))?;
                report.rescheduled += 1;
            }
        }

        if report != RecoveryReport::default() {
            warn!(
                interrupted = report.interrupted,
                resubmitted = report.resubmitted,
                rescheduled = report.rescheduled,
                "recovered state from previous run"
            );
        }
        Ok(report)
    }

    /// Dispatch every schedule due at `now`. Returns the number of runs claimed.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut dispatched = 0;

        for schedule in self.ledger.due_schedules(now)? {
            let Some(due_at) = schedule.next_run_at else {
                continue;
            };
            // Backlog is skipped: the next firing is the first one after now.
            let next = next_for(&schedule, now);

            match self.ledger.claim_due(schedule.id, due_at, next, now)? {
                Some(run) => {
                    info!(
                        schedule_id = schedule.id,
                        run_id = run.id,
                        due_at = %due_at,
                        next_run_at = ?next,
                        "schedule fired"
                    );
                    self.dispatcher.submit(ticket(&run)).await?;
                    dispatched += 1;
                }
                None => debug!(schedule_id = schedule.id, "firing not claimed"),
            }
        }
        Ok(dispatched)
    }

    /// Main loop. Ticks until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(tick_secs = self.tick.as_secs(), "scheduler engine started");
        if let Err(e) = self.recover(Utc::now()).await {
            error!("scheduler recovery failed: {e}");
        }

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!("scheduler tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }
}
