//! `reportd-core`: configuration, domain types and the error taxonomy shared
//! by every reportd crate.

pub mod clock;
pub mod config;
pub mod error;
pub mod settings;
pub mod template;
pub mod timerange;
pub mod types;

pub use error::{FailureKind, ReportdError, Result, RunFailure};
pub use settings::{Limits, RendererBackend, RendererSettings, Settings, SmtpMode, SmtpSettings};
pub use types::{
    OrgId, Recipients, Recurrence, ReportFormat, Run, RunId, RunMetrics, RunStatus, RunTrigger,
    Schedule, ScheduleDraft, ScheduleId, TimeRange,
};
