use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ReportdError, Result};
use crate::types::OrgId;

/// Which SMTP block an organization sends through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SmtpMode {
    /// Process-wide `[smtp]` from the config file, org block as fallback.
    #[default]
    Global,
    /// The organization's own `smtp` block.
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub from: String,
    #[serde(default)]
    pub use_tls: bool,
}

fn default_smtp_port() -> u16 {
    25
}

/// Hint forwarded to the render service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RendererBackend {
    #[default]
    ImageRenderer,
    Native,
}

impl RendererBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            RendererBackend::ImageRenderer => "image_renderer",
            RendererBackend::Native => "native",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendererSettings {
    #[serde(default)]
    pub backend: RendererBackend,
    pub timeout_ms: u64,
    /// Settle time the renderer waits before capturing.
    pub delay_ms: u64,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub device_scale_factor: f64,
    #[serde(default)]
    pub skip_tls_verify: bool,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            backend: RendererBackend::default(),
            timeout_ms: 60_000,
            delay_ms: 1_000,
            viewport_width: 1920,
            viewport_height: 1080,
            device_scale_factor: 1.0,
            skip_tls_verify: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub max_recipients: u32,
    pub max_attachment_size_mb: u32,
    pub max_concurrent_renders: u32,
    pub retention_days: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_recipients: 50,
            max_attachment_size_mb: 25,
            max_concurrent_renders: 5,
            retention_days: 30,
        }
    }
}

impl Limits {
    pub fn max_attachment_bytes(&self) -> u64 {
        u64::from(self.max_attachment_size_mb) * 1024 * 1024
    }
}

/// Per-organization settings. Created with defaults on first access and
/// only ever replaced wholesale by a save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub org_id: OrgId,
    #[serde(default)]
    pub smtp_mode: SmtpMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp: Option<SmtpSettings>,
    #[serde(default)]
    pub renderer: RendererSettings,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Settings {
    pub fn defaults_for(org_id: OrgId) -> Self {
        Self {
            org_id,
            smtp_mode: SmtpMode::Global,
            smtp: None,
            renderer: RendererSettings::default(),
            limits: Limits::default(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Reject settings that would make every run fail.
    pub fn validate(&self) -> Result<()> {
        let l = &self.limits;
        for (name, value) in [
            ("max_recipients", l.max_recipients),
            ("max_attachment_size_mb", l.max_attachment_size_mb),
            ("max_concurrent_renders", l.max_concurrent_renders),
            ("retention_days", l.retention_days),
        ] {
            if value == 0 {
                return Err(ReportdError::Validation(format!(
                    "limits.{name} must be at least 1"
                )));
            }
        }
        if self.renderer.timeout_ms == 0 {
            return Err(ReportdError::Validation(
                "renderer.timeout_ms must be at least 1".to_string(),
            ));
        }
        if self.smtp_mode == SmtpMode::Custom && self.smtp.is_none() {
            return Err(ReportdError::Validation(
                "smtp_mode 'custom' requires an smtp block".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::defaults_for(7);
        assert_eq!(s.org_id, 7);
        assert_eq!(s.smtp_mode, SmtpMode::Global);
        assert_eq!(s.renderer.timeout_ms, 60_000);
        assert_eq!(s.renderer.viewport_width, 1920);
        assert_eq!(s.limits.max_recipients, 50);
        assert_eq!(s.limits.max_attachment_size_mb, 25);
        assert_eq!(s.limits.max_concurrent_renders, 5);
        assert_eq!(s.limits.retention_days, 30);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn zero_limit_is_rejected() {
        let mut s = Settings::defaults_for(1);
        s.limits.max_concurrent_renders = 0;
        let err = s.validate().unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("max_concurrent_renders"));
    }

    #[test]
    fn custom_smtp_requires_block() {
        let mut s = Settings::defaults_for(1);
        s.smtp_mode = SmtpMode::Custom;
        assert!(s.validate().is_err());
        s.smtp = Some(SmtpSettings {
            host: "mail.example.com".into(),
            port: 587,
            username: String::new(),
            password: String::new(),
            from: "reports@example.com".into(),
            use_tls: true,
        });
        assert!(s.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: Settings = serde_json::from_str(r#"{"limits":{"max_recipients":10,"max_attachment_size_mb":5,"max_concurrent_renders":2,"retention_days":7}}"#).unwrap();
        assert_eq!(s.limits.max_recipients, 10);
        assert_eq!(s.renderer, RendererSettings::default());
        assert_eq!(s.limits.max_attachment_bytes(), 5 * 1024 * 1024);
    }
}
