//! `reportd-scheduler`: turns schedules into delivered reports.
//!
//! # Overview
//!
//! The [`engine::SchedulerEngine`] wakes once per tick, claims one run per
//! due schedule in the ledger and hands it to the [`dispatch::Dispatcher`].
//! Workers run each claim through the [`executor::RunExecutor`]: limit
//! checks, a per-org [`gate::ConcurrencyGate`] slot, render, artifact write,
//! delivery. The [`retention::RetentionSweeper`] removes expired artifacts.
//!
//! # Recurrence
//!
//! | Variant   | Fires                                                 |
//! |-----------|-------------------------------------------------------|
//! | `daily`   | Every day at the creation time-of-day, local time     |
//! | `weekly`  | Same weekday and time-of-day as creation              |
//! | `monthly` | Same day-of-month (clamped to month end) and time     |
//! | `cron`    | 5-field expression evaluated in the schedule timezone |

pub mod artifacts;
pub mod cron;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod executor;
pub mod gate;
pub mod retention;
pub mod schedule;
pub mod service;
pub mod settings;

pub use artifacts::{ArtifactStore, StoredArtifact};
pub use cron::CronExpr;
pub use dispatch::{run_workers, Dispatcher, RunTicket};
pub use engine::{RecoveryReport, SchedulerEngine};
pub use error::{Result, SchedulerError};
pub use executor::RunExecutor;
pub use gate::{ConcurrencyGate, GatePermit, GateTimeout};
pub use retention::{RetentionSweeper, SweepReport};
pub use schedule::{compute_next_run, validate_recurrence};
pub use service::{ArtifactDownload, ScheduleService};
pub use settings::SettingsCache;
