use std::time::Duration;

use async_trait::async_trait;
use reportd_core::config::RendererServiceConfig;
use reportd_core::RendererSettings;
use tracing::{debug, warn};

use crate::error::{classify_status, RenderError};
use crate::renderer::{RenderOutput, RenderRequest, Renderer};

/// Response header carrying the number of rendered pages.
pub const PAGE_COUNT_HEADER: &str = "x-page-count";

/// Client for the dashboard image/PDF render service.
///
/// Keeps two connection pools: one verifying TLS and one that does not, for
/// organizations that set `skip_tls_verify`.
pub struct HttpRenderer {
    client: reqwest::Client,
    insecure_client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRenderer {
    pub fn new(config: &RendererServiceConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            insecure_client: reqwest::Client::builder()
                .danger_accept_invalid_certs(true)
                .build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone().filter(|t| !t.is_empty()),
        })
    }

    /// `{base_url}/render/{format}/d/{uid}`
    fn url(&self, req: &RenderRequest) -> String {
        format!(
            "{}/render/{}/d/{}",
            self.base_url,
            req.format.extension(),
            req.dashboard_uid
        )
    }

    fn query(req: &RenderRequest, settings: &RendererSettings) -> Vec<(String, String)> {
        let timeout_secs = settings.timeout_ms.div_ceil(1000).max(1);
        let mut q = vec![
            ("from".to_string(), req.range.from.timestamp_millis().to_string()),
            ("to".to_string(), req.range.to.timestamp_millis().to_string()),
            ("orgId".to_string(), req.org_id.to_string()),
            ("tz".to_string(), req.timezone.clone()),
            ("width".to_string(), settings.viewport_width.to_string()),
            ("height".to_string(), settings.viewport_height.to_string()),
            (
                "deviceScaleFactor".to_string(),
                settings.device_scale_factor.to_string(),
            ),
            ("timeout".to_string(), timeout_secs.to_string()),
            ("delay".to_string(), settings.delay_ms.to_string()),
            ("backend".to_string(), settings.backend.as_str().to_string()),
            ("kiosk".to_string(), "true".to_string()),
        ];
        for (name, value) in &req.variables {
            q.push((format!("var-{name}"), value.clone()));
        }
        q
    }
}

fn transport_error(e: reqwest::Error, timeout_ms: u64) -> RenderError {
    if e.is_timeout() {
        RenderError::Timeout {
            after_ms: timeout_ms,
        }
    } else {
        RenderError::Unreachable(e.to_string())
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    fn name(&self) -> &str {
        "http"
    }

    async fn render(
        &self,
        req: &RenderRequest,
        settings: &RendererSettings,
    ) -> Result<RenderOutput, RenderError> {
        let client = if settings.skip_tls_verify {
            &self.insecure_client
        } else {
            &self.client
        };
        let url = self.url(req);
        debug!(%url, org_id = req.org_id, format = %req.format, "requesting render");

        let mut builder = client
            .get(&url)
            .query(&Self::query(req, settings))
            .timeout(Duration::from_millis(settings.timeout_ms));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| transport_error(e, settings.timeout_ms))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, dashboard_uid = %req.dashboard_uid, "render service error");
            return Err(classify_status(status, text));
        }

        let page_count = resp
            .headers()
            .get(PAGE_COUNT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(1);

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| transport_error(e, settings.timeout_ms))?;

        debug!(bytes = bytes.len(), page_count, "render complete");
        Ok(RenderOutput {
            bytes: bytes.to_vec(),
            page_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};
    use reportd_core::timerange::ResolvedRange;
    use reportd_core::ReportFormat;

    use super::*;

    fn request() -> RenderRequest {
        RenderRequest {
            org_id: 3,
            dashboard_uid: "abc".to_string(),
            range: ResolvedRange {
                from: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                to: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            },
            timezone: "Europe/Berlin".to_string(),
            variables: BTreeMap::from([("host".to_string(), "db-1".to_string())]),
            format: ReportFormat::Pdf,
        }
    }

    #[test]
    fn url_strips_trailing_slash() {
        let renderer = HttpRenderer::new(&RendererServiceConfig {
            base_url: "http://render.local:8081/".to_string(),
            token: Some(String::new()),
        })
        .unwrap();
        assert_eq!(
            renderer.url(&request()),
            "http://render.local:8081/render/pdf/d/abc"
        );
        assert!(renderer.token.is_none(), "empty token is not sent");
    }

    #[test]
    fn query_carries_range_viewport_and_variables() {
        let settings = RendererSettings {
            timeout_ms: 1_500,
            ..RendererSettings::default()
        };
        let q = HttpRenderer::query(&request(), &settings);
        let get = |k: &str| {
            q.iter()
                .find(|(name, _)| name == k)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("from"), Some("1704067200000"));
        assert_eq!(get("to"), Some("1704153600000"));
        assert_eq!(get("orgId"), Some("3"));
        assert_eq!(get("tz"), Some("Europe/Berlin"));
        assert_eq!(get("width"), Some("1920"));
        assert_eq!(get("timeout"), Some("2"));
        assert_eq!(get("backend"), Some("image_renderer"));
        assert_eq!(get("var-host"), Some("db-1"));
    }
}
