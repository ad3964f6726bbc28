use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportdError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReportdError {
    pub fn not_found(kind: &'static str, id: impl fmt::Display) -> Self {
        ReportdError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Short error code string returned to HTTP clients.
    pub fn code(&self) -> &'static str {
        match self {
            ReportdError::Config(_) => "CONFIG_ERROR",
            ReportdError::Validation(_) => "VALIDATION_ERROR",
            ReportdError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            ReportdError::NotFound { .. } => "NOT_FOUND",
            ReportdError::Conflict(_) => "CONFLICT",
            ReportdError::Database(_) => "DATABASE_ERROR",
            ReportdError::Serialization(_) => "SERIALIZATION_ERROR",
            ReportdError::Io(_) => "IO_ERROR",
            ReportdError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ReportdError>;

/// Classification of an execution-time failure, persisted as `runs.error_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    LimitExceeded,
    ConcurrencyExhausted,
    RenderTimeout,
    RenderUnreachable,
    RenderAuthFailed,
    RenderBadRequest,
    DeliveryTransportFailure,
    DeliveryInvalidRecipient,
    Artifact,
    Interrupted,
    Internal,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::LimitExceeded => "limit_exceeded",
            FailureKind::ConcurrencyExhausted => "concurrency_exhausted",
            FailureKind::RenderTimeout => "render_timeout",
            FailureKind::RenderUnreachable => "render_unreachable",
            FailureKind::RenderAuthFailed => "render_auth_failed",
            FailureKind::RenderBadRequest => "render_bad_request",
            FailureKind::DeliveryTransportFailure => "delivery_transport_failure",
            FailureKind::DeliveryInvalidRecipient => "delivery_invalid_recipient",
            FailureKind::Artifact => "artifact",
            FailureKind::Interrupted => "interrupted",
            FailureKind::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An execution failure captured on the run record instead of being raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl RunFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Text stored in `runs.error_text`.
    pub fn error_text(&self) -> String {
        format!("{}: {}", self.kind, self.message)
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
