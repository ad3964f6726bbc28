use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::settings::SmtpSettings;

pub const DEFAULT_PORT: u16 = 8470;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_TICK_SECS: u64 = 60;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_GATE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_DISPATCH_QUEUE: usize = 256;

/// Top-level config (reportd.toml + REPORTD_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReportdConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub renderer: RendererServiceConfig,
    /// Process-wide SMTP used by organizations in `global` SMTP mode.
    #[serde(default)]
    pub smtp: Option<SmtpSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    #[serde(default = "default_artifacts_dir")]
    pub dir: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: default_artifacts_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due-schedule scans.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Seconds between retention sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// How long a run may wait for a render slot before failing.
    #[serde(default = "default_gate_timeout_secs")]
    pub gate_timeout_secs: u64,
    #[serde(default = "default_dispatch_queue")]
    pub dispatch_queue: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: DEFAULT_TICK_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            gate_timeout_secs: DEFAULT_GATE_TIMEOUT_SECS,
            dispatch_queue: DEFAULT_DISPATCH_QUEUE,
        }
    }
}

/// Where the dashboard render service lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererServiceConfig {
    #[serde(default = "default_renderer_url")]
    pub base_url: String,
    /// Service-account token sent as `Authorization: Bearer`.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for RendererServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_renderer_url(),
            token: None,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_tick_secs() -> u64 {
    DEFAULT_TICK_SECS
}
fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}
fn default_gate_timeout_secs() -> u64 {
    DEFAULT_GATE_TIMEOUT_SECS
}
fn default_dispatch_queue() -> usize {
    DEFAULT_DISPATCH_QUEUE
}
fn default_renderer_url() -> String {
    "http://127.0.0.1:3000".to_string()
}
fn default_db_path() -> String {
    format!("{}/reportd.db", data_dir())
}
fn default_artifacts_dir() -> String {
    format!("{}/artifacts", data_dir())
}

fn data_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.reportd", home)
}

impl ReportdConfig {
    /// Load config from a TOML file with REPORTD_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. `REPORTD_CONFIG`
    ///   3. ~/.reportd/reportd.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("REPORTD_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::ReportdError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(ReportdConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("REPORTD_").split("__"))
    }
}

fn default_config_path() -> String {
    format!("{}/reportd.toml", data_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = ReportdConfig::load(Some("/nonexistent/reportd.toml")).unwrap();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.scheduler.tick_secs, DEFAULT_TICK_SECS);
        assert!(config.smtp.is_none());
    }

    #[test]
    fn toml_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "reportd.toml",
                r#"
                [server]
                port = 9000

                [scheduler]
                tick_secs = 5

                [smtp]
                host = "mail.example.com"
                from = "reports@example.com"
                "#,
            )?;
            let config = ReportdConfig::load(Some("reportd.toml")).unwrap();
            assert_eq!(config.server.port, 9000);
            assert_eq!(config.server.bind, DEFAULT_BIND);
            assert_eq!(config.scheduler.tick_secs, 5);
            assert_eq!(config.scheduler.gate_timeout_secs, DEFAULT_GATE_TIMEOUT_SECS);
            let smtp = config.smtp.unwrap();
            assert_eq!(smtp.port, 25);
            assert!(!smtp.use_tls);
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("reportd.toml", "[server]\nport = 9000\n")?;
            jail.set_env("REPORTD_SERVER__PORT", "9100");
            jail.set_env("REPORTD_RENDERER__BASE_URL", "http://grafana:3000");
            let config = ReportdConfig::load(Some("reportd.toml")).unwrap();
            assert_eq!(config.server.port, 9100);
            assert_eq!(config.renderer.base_url, "http://grafana:3000");
            Ok(())
        });
    }
}
