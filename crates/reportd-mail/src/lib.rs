//! `reportd-mail`: delivery of rendered reports over SMTP.

pub mod email;
pub mod error;
pub mod mailer;

pub use email::{ReportAttachment, ReportEmail};
pub use error::DeliveryError;
pub use mailer::{resolve_smtp, Ack, Mailer, SmtpMailer};
