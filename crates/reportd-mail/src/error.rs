use reportd_core::{FailureKind, RunFailure};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Connection, TLS, authentication or a temporary server refusal.
    #[error("SMTP transport failure: {0}")]
    TransportFailure(String),

    /// An address that cannot be parsed or that the server permanently rejects.
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
}

impl DeliveryError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            DeliveryError::TransportFailure(_) => FailureKind::DeliveryTransportFailure,
            DeliveryError::InvalidRecipient(_) => FailureKind::DeliveryInvalidRecipient,
        }
    }
}

impl From<DeliveryError> for RunFailure {
    fn from(e: DeliveryError) -> Self {
        RunFailure::new(e.failure_kind(), e.to_string())
    }
}

/// SMTP reply codes that mean "this mailbox will never accept mail".
const MAILBOX_REJECTIONS: [&str; 4] = ["550", "551", "553", "554"];

pub(crate) fn classify_smtp_error(e: &lettre::transport::smtp::Error) -> DeliveryError {
    let rejected_mailbox = e.is_permanent()
        && e
            .status()
            .is_some_and(|code| MAILBOX_REJECTIONS.contains(&code.to_string().as_str()));
    if rejected_mailbox {
        DeliveryError::InvalidRecipient(e.to_string())
    } else {
        DeliveryError::TransportFailure(e.to_string())
    }
}
