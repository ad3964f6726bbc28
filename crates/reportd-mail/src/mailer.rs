use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use reportd_core::{Settings, SmtpMode, SmtpSettings};
use tracing::{debug, info};

use crate::email::ReportEmail;
use crate::error::{classify_smtp_error, DeliveryError};

/// Server acknowledgement of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub recipients: usize,
    /// SMTP reply code of the final response, e.g. `250`.
    pub code: String,
}

/// Sends a report email through some transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, smtp: &SmtpSettings, email: &ReportEmail) -> Result<Ack, DeliveryError>;
}

/// Pick the SMTP block for an organization.
///
/// `custom` uses the org block. `global` uses the process block and falls
/// back to the org block.
pub fn resolve_smtp(
    settings: &Settings,
    global: Option<&SmtpSettings>,
) -> Result<SmtpSettings, DeliveryError> {
    let chosen = match settings.smtp_mode {
        SmtpMode::Custom => settings.smtp.as_ref(),
        SmtpMode::Global => global.or(settings.smtp.as_ref()),
    };
    chosen
        .filter(|s| !s.host.trim().is_empty())
        .cloned()
        .ok_or_else(|| DeliveryError::TransportFailure("no SMTP configuration available".into()))
}

/// [`Mailer`] backed by lettre's async SMTP transport.
///
/// A transport is built per send since every organization may point at a
/// different server.
pub struct SmtpMailer {
    timeout: Duration,
}

impl SmtpMailer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn transport(
        &self,
        smtp: &SmtpSettings,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, DeliveryError> {
        let builder = if smtp.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
                .map_err(|e| DeliveryError::TransportFailure(format!("SMTP relay: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
        };
        let mut builder = builder.port(smtp.port).timeout(Some(self.timeout));
        if !smtp.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                smtp.username.clone(),
                smtp.password.clone(),
            ));
        }
        Ok(builder.build())
    }
}

impl Default for SmtpMailer {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, smtp: &SmtpSettings, email: &ReportEmail) -> Result<Ack, DeliveryError> {
        let message = email.to_message(&smtp.from)?;
        let transport = self.transport(smtp)?;

        debug!(host = %smtp.host, port = smtp.port, tls = smtp.use_tls, "sending report email");
        let response = transport
            .send(message)
            .await
            .map_err(|e| classify_smtp_error(&e))?;

        let recipients = email.recipient_count();
        info!(recipients, host = %smtp.host, "report email accepted");
        Ok(Ack {
            recipients,
            code: response.code().to_string(),
        })
    }
}
