use reportd_core::ReportdError;
use reportd_ledger::LedgerError;
use thiserror::Error;

/// Errors that can occur within the scheduling engine.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The recurrence or timezone of a schedule is invalid or can never fire.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Artifact I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The dispatch worker has stopped accepting runs.
    #[error("Dispatch queue closed")]
    DispatchClosed,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

impl From<SchedulerError> for ReportdError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::Ledger(e) => e.into(),
            SchedulerError::InvalidSchedule(msg) => ReportdError::Validation(msg),
            SchedulerError::Io(e) => ReportdError::Io(e),
            SchedulerError::DispatchClosed => ReportdError::Internal("dispatch queue closed".into()),
        }
    }
}
