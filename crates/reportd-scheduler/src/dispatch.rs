use std::sync::Arc;

use reportd_core::{OrgId, RunId, ScheduleId};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SchedulerError};
use crate::executor::RunExecutor;

/// A claimed run waiting for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTicket {
    pub run_id: RunId,
    pub schedule_id: ScheduleId,
    pub org_id: OrgId,
}

/// Handle through which the tick loop and manual triggers hand runs to the
/// worker pool. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<RunTicket>,
}

impl Dispatcher {
    /// Create a dispatcher and the receiving end for [`run_workers`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RunTicket>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub async fn submit(&self, ticket: RunTicket) -> Result<()> {
        debug!(run_id = ticket.run_id, schedule_id = ticket.schedule_id, "run submitted");
        self.tx
            .send(ticket)
            .await
            .map_err(|_| SchedulerError::DispatchClosed)
    }
}

/// Drain tickets into one Tokio task per run until shutdown, then wait for
/// the runs already started.
pub async fn run_workers(
    executor: Arc<RunExecutor>,
    mut rx: mpsc::Receiver<RunTicket>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("dispatch workers started");
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            ticket = rx.recv() => {
                let Some(ticket) = ticket else { break };
                let executor = executor.clone();
                tasks.spawn(async move {
                    if let Err(e) = executor.execute(ticket.run_id).await {
                        error!(run_id = ticket.run_id, org_id = ticket.org_id, "run could not be recorded: {e}");
                    }
                });
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    error!("run worker panicked: {e}");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("dispatch workers shutting down");
                    break;
                }
            }
        }
    }

    if !tasks.is_empty() {
        warn!(in_flight = tasks.len(), "waiting for in-flight runs");
    }
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("run worker panicked: {e}");
        }
    }
}
