//! `{{placeholder}}` interpolation for email subjects and bodies.

use std::collections::BTreeMap;

/// Subject used when a schedule leaves its subject empty.
pub const DEFAULT_SUBJECT: &str = "Report: {{schedule.name}}";

/// Values available to email templates for one run.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    vars: BTreeMap<&'static str, String>,
}

impl TemplateVars {
    pub fn new(schedule_name: &str, dashboard_title: &str, timerange: &str, started_at: &str) -> Self {
        let mut vars = BTreeMap::new();
        vars.insert("schedule.name", schedule_name.to_string());
        vars.insert("dashboard.title", dashboard_title.to_string());
        vars.insert("timerange", timerange.to_string());
        vars.insert("run.started_at", started_at.to_string());
        Self { vars }
    }

    /// Replace every known `{{key}}` (whitespace inside braces allowed).
    /// Unknown placeholders are left untouched.
    pub fn render(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            match after.find("}}") {
                Some(close) => {
                    let key = after[..close].trim();
                    match self.vars.get(key) {
                        Some(value) => out.push_str(value),
                        None => out.push_str(&rest[open..open + 2 + close + 2]),
                    }
                    rest = &after[close + 2..];
                }
                None => {
                    out.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// File name for an attachment: `<name>-<YYYY-MM-DD-HHMMSS>.<ext>`, with
/// anything outside `[A-Za-z0-9._-]` replaced by `_`.
pub fn attachment_name(schedule_name: &str, stamp: &str, extension: &str) -> String {
    let mut name: String = schedule_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() {
        name.push_str("report");
    }
    format!("{name}-{stamp}.{extension}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> TemplateVars {
        TemplateVars::new("Weekly Ops", "Ops Overview", "last week", "Mon, 11 Mar 2024 08:00:00 -0400")
    }

    #[test]
    fn substitutes_known_placeholders() {
        let out = vars().render("{{schedule.name}} for {{ dashboard.title }} ({{timerange}})");
        assert_eq!(out, "Weekly Ops for Ops Overview (last week)");
    }

    #[test]
    fn leaves_unknown_and_unterminated_alone() {
        assert_eq!(vars().render("hi {{user.name}}!"), "hi {{user.name}}!");
        assert_eq!(vars().render("broken {{schedule.name"), "broken {{schedule.name");
    }

    #[test]
    fn default_subject_renders() {
        assert_eq!(vars().render(DEFAULT_SUBJECT), "Report: Weekly Ops");
    }

    #[test]
    fn attachment_name_is_sanitized() {
        assert_eq!(
            attachment_name("Ops / Weekly", "2024-03-11-080000", "pdf"),
            "Ops___Weekly-2024-03-11-080000.pdf"
        );
        assert_eq!(attachment_name("", "x", "html"), "report-x.html");
    }
}
