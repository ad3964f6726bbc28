use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Organization (tenant) identifier.
pub type OrgId = i64;
/// Schedule row identifier, unique within the ledger.
pub type ScheduleId = i64;
/// Run row identifier, unique within the ledger.
pub type RunId = i64;

/// When a schedule fires.
///
/// Serialised flat into the schedule JSON as `interval_type` plus
/// `cron_expr` for the cron variant, matching the resource surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "interval_type", rename_all = "snake_case")]
pub enum Recurrence {
    /// Every day at the anchor's local time-of-day.
    Daily,
    /// Every week on the anchor's weekday and local time-of-day.
    Weekly,
    /// Every month on the anchor's day-of-month (clamped) and local time-of-day.
    Monthly,
    /// 5-field cron expression evaluated in the schedule's timezone.
    Cron { cron_expr: String },
}

impl Recurrence {
    pub fn interval_type(&self) -> &'static str {
        match self {
            Recurrence::Daily => "daily",
            Recurrence::Weekly => "weekly",
            Recurrence::Monthly => "monthly",
            Recurrence::Cron { .. } => "cron",
        }
    }

    pub fn cron_expr(&self) -> Option<&str> {
        match self {
            Recurrence::Cron { cron_expr } => Some(cron_expr),
            _ => None,
        }
    }

    /// Rebuild from the two persisted columns.
    pub fn from_columns(interval_type: &str, cron_expr: Option<String>) -> Result<Self, String> {
        match (interval_type, cron_expr) {
            ("daily", _) => Ok(Recurrence::Daily),
            ("weekly", _) => Ok(Recurrence::Weekly),
            ("monthly", _) => Ok(Recurrence::Monthly),
            ("cron", Some(cron_expr)) => Ok(Recurrence::Cron { cron_expr }),
            ("cron", None) => Err("cron interval without cron_expr".to_string()),
            (other, _) => Err(format!("unknown interval type: {other}")),
        }
    }
}

/// Output format of a rendered report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Pdf,
    Html,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Pdf => "pdf",
            ReportFormat::Html => "html",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ReportFormat::Pdf => "application/pdf",
            ReportFormat::Html => "text/html; charset=utf-8",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(ReportFormat::Pdf),
            "html" => Ok(ReportFormat::Html),
            other => Err(format!("unknown report format: {other}")),
        }
    }
}

/// Email recipients. Order within each list is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Recipients {
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
}

impl Recipients {
    /// Total number of addresses across to/cc/bcc.
    pub fn count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }
}

/// Dashboard time range as written by the user (`now-7d`, RFC 3339, epoch ms).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: String,
    pub to: String,
}

impl Default for TimeRange {
    fn default() -> Self {
        Self {
            from: "now-24h".to_string(),
            to: "now".to_string(),
        }
    }
}

/// A persisted report schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub org_id: OrgId,
    pub name: String,
    pub dashboard_uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_title: Option<String>,
    pub time_range: TimeRange,
    #[serde(flatten)]
    pub recurrence: Recurrence,
    /// IANA timezone name used for recurrence and time-range resolution.
    pub timezone: String,
    pub format: ReportFormat,
    /// Dashboard variable overrides (`var-<name>=<value>`).
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    pub recipients: Recipients,
    pub email_subject: String,
    pub email_body: String,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub owner_user_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    /// Title used in templates; falls back to the dashboard uid.
    pub fn display_title(&self) -> &str {
        self.dashboard_title
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.dashboard_uid)
    }
}

/// Caller-supplied fields for creating or replacing a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleDraft {
    pub name: String,
    pub dashboard_uid: String,
    #[serde(default)]
    pub dashboard_title: Option<String>,
    #[serde(default)]
    pub time_range: TimeRange,
    #[serde(flatten)]
    pub recurrence: Recurrence,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub format: ReportFormat,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub recipients: Recipients,
    #[serde(default)]
    pub email_subject: String,
    #[serde(default)]
    pub email_body: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn bool_true() -> bool {
    true
}

/// Lifecycle state of a run.
///
/// Transitions are monotonic: `Pending -> Running -> {Completed, Failed}`,
/// plus `Pending -> Failed` for runs rejected before rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn can_transition_to(self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Pending, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// How a run was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduled,
    Manual,
}

/// One execution attempt of a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub schedule_id: ScheduleId,
    pub org_id: OrgId,
    pub trigger: RunTrigger,
    pub status: RunStatus,
    /// Creation instant; stamped on dispatch.
    pub started_at: DateTime<Utc>,
    /// When the executor began rendering.
    pub running_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
    /// Set once the retention sweep removed the artifact file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_swept_at: Option<DateTime<Utc>>,
    pub format: ReportFormat,
    pub rendered_pages: u32,
    pub bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Success metrics written with the `completed` transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMetrics {
    pub rendered_pages: u32,
    pub bytes: u64,
    pub checksum: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_transitions_are_monotonic() {
        use RunStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Failed));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));

        for terminal in [Completed, Failed] {
            for next in [Pending, Running, Completed, Failed] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
        assert!(!Running.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn recurrence_serialises_flat() {
        let draft: ScheduleDraft = serde_json::from_str(
            r#"{
                "name": "weekly ops",
                "dashboard_uid": "abc",
                "interval_type": "cron",
                "cron_expr": "0 8 * * 1",
                "recipients": {"to": ["a@example.com"]}
            }"#,
        )
        .unwrap();
        assert_eq!(
            draft.recurrence,
            Recurrence::Cron {
                cron_expr: "0 8 * * 1".to_string()
            }
        );
        assert_eq!(draft.timezone, "UTC");
        assert_eq!(draft.format, ReportFormat::Pdf);
        assert!(draft.enabled);

        let json = serde_json::to_value(&draft).unwrap();
        assert_eq!(json["interval_type"], "cron");
        assert_eq!(json["cron_expr"], "0 8 * * 1");
    }

    #[test]
    fn daily_recurrence_has_no_cron_expr() {
        let r: Recurrence = serde_json::from_str(r#"{"interval_type":"daily"}"#).unwrap();
        assert_eq!(r, Recurrence::Daily);
        assert_eq!(r.cron_expr(), None);
        assert!(serde_json::from_str::<Recurrence>(r#"{"interval_type":"hourly"}"#).is_err());
    }

    #[test]
    fn recurrence_from_columns_requires_cron_expr() {
        assert!(Recurrence::from_columns("cron", None).is_err());
        assert_eq!(
            Recurrence::from_columns("monthly", None).unwrap(),
            Recurrence::Monthly
        );
    }

    #[test]
    fn recipients_count_spans_all_lists() {
        let r = Recipients {
            to: vec!["a@x".into(), "b@x".into()],
            cc: vec!["c@x".into()],
            bcc: vec!["d@x".into()],
        };
        assert_eq!(r.count(), 4);
    }
}
