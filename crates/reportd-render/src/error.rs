use reportd_core::{FailureKind, RunFailure};

/// Why a render attempt produced no bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("render timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// Connection refused/reset or a 5xx from the render service.
    #[error("renderer unreachable: {0}")]
    Unreachable(String),

    #[error("renderer rejected credentials ({status}): {message}")]
    AuthFailed { status: u16, message: String },

    /// The render service refused the request itself (unknown dashboard,
    /// malformed parameters).
    #[error("renderer rejected request ({status}): {message}")]
    BadRequest { status: u16, message: String },
}

impl RenderError {
    /// Only transport-level failures are worth one immediate retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RenderError::Unreachable(_))
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            RenderError::Timeout { .. } => FailureKind::RenderTimeout,
            RenderError::Unreachable(_) => FailureKind::RenderUnreachable,
            RenderError::AuthFailed { .. } => FailureKind::RenderAuthFailed,
            RenderError::BadRequest { .. } => FailureKind::RenderBadRequest,
        }
    }
}

impl From<RenderError> for RunFailure {
    fn from(e: RenderError) -> Self {
        RunFailure::new(e.failure_kind(), e.to_string())
    }
}

/// Classify a non-success HTTP status from the render service.
pub(crate) fn classify_status(status: u16, message: String) -> RenderError {
    match status {
        401 | 403 => RenderError::AuthFailed { status, message },
        400..=499 => RenderError::BadRequest { status, message },
        _ => RenderError::Unreachable(format!("HTTP {status}: {message}")),
    }
}
