use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::Message;

use crate::error::DeliveryError;

/// A rendered report as it will be attached to the email.
#[derive(Debug, Clone)]
pub struct ReportAttachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// One outgoing report email. Subject and body are already interpolated.
#[derive(Debug, Clone)]
pub struct ReportEmail {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    /// HTML body.
    pub body: String,
    pub attachment: ReportAttachment,
}

fn mailbox(addr: &str) -> Result<Mailbox, DeliveryError> {
    addr.trim()
        .parse()
        .map_err(|e| DeliveryError::InvalidRecipient(format!("{addr}: {e}")))
}

impl ReportEmail {
    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }

    /// Build the MIME message: HTML body plus one attachment.
    pub fn to_message(&self, from: &str) -> Result<Message, DeliveryError> {
        let from: Mailbox = from
            .trim()
            .parse()
            .map_err(|e| DeliveryError::TransportFailure(format!("invalid sender {from}: {e}")))?;

        let mut builder = Message::builder().from(from).subject(self.subject.clone());
        for addr in &self.to {
            builder = builder.to(mailbox(addr)?);
        }
        for addr in &self.cc {
            builder = builder.cc(mailbox(addr)?);
        }
        for addr in &self.bcc {
            builder = builder.bcc(mailbox(addr)?);
        }

        let content_type = ContentType::parse(&self.attachment.content_type)
            .or_else(|_| ContentType::parse("application/octet-stream"))
            .map_err(|e| DeliveryError::TransportFailure(format!("content type: {e}")))?;
        let attachment = Attachment::new(self.attachment.file_name.clone())
            .body(self.attachment.bytes.clone(), content_type);

        builder
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::html(self.body.clone()))
                    .singlepart(attachment),
            )
            .map_err(|e| DeliveryError::InvalidRecipient(format!("build email: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> ReportEmail {
        ReportEmail {
            to: vec!["ops@example.com".into()],
            cc: vec!["Lead <lead@example.com>".into()],
            bcc: vec!["audit@example.com".into()],
            subject: "Report: nightly".into(),
            body: "<p>attached</p>".into(),
            attachment: ReportAttachment {
                file_name: "nightly-2024-01-10-080000.pdf".into(),
                content_type: "application/pdf".into(),
                bytes: b"%PDF-1.7".to_vec(),
            },
        }
    }

    #[test]
    fn envelope_includes_every_recipient() {
        let msg = email().to_message("reports@example.com").unwrap();
        assert_eq!(msg.envelope().to().len(), 3);
        let raw = String::from_utf8_lossy(&msg.formatted()).to_string();
        assert!(raw.contains("Subject: Report: nightly"));
        assert!(raw.contains("nightly-2024-01-10-080000.pdf"));
        assert!(raw.contains("application/pdf"));
    }

    #[test]
    fn malformed_recipient_is_rejected() {
        let mut e = email();
        e.cc.push("not an address".into());
        assert!(matches!(
            e.to_message("reports@example.com"),
            Err(DeliveryError::InvalidRecipient(_))
        ));
    }

    #[test]
    fn malformed_sender_is_transport_failure() {
        assert!(matches!(
            email().to_message("nobody"),
            Err(DeliveryError::TransportFailure(_))
        ));
    }
}
