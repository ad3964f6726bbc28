use reportd_core::{ReportdError, RunId, RunStatus, ScheduleId};
use thiserror::Error;

/// Errors raised by the run ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: i64 },

    /// A conditional status update matched no row.
    #[error("Run {run_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        run_id: RunId,
        from: RunStatus,
        to: RunStatus,
    },

    /// The schedule already has a pending or running run.
    #[error("Schedule {schedule_id} already has a run in flight")]
    AlreadyInFlight { schedule_id: ScheduleId },

    /// A stored row could not be decoded.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Ledger connection lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, LedgerError>;

impl From<LedgerError> for ReportdError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotFound { kind, id } => ReportdError::not_found(kind, id),
            LedgerError::AlreadyInFlight { .. } => ReportdError::Conflict(e.to_string()),
            LedgerError::InvalidTransition { .. } => ReportdError::Conflict(e.to_string()),
            LedgerError::Serialization(e) => ReportdError::Serialization(e),
            other => ReportdError::Database(other.to_string()),
        }
    }
}
