use std::collections::BTreeMap;

use async_trait::async_trait;
use reportd_core::timerange::ResolvedRange;
use reportd_core::{OrgId, RendererSettings, ReportFormat};

use crate::error::RenderError;

/// Everything the render service needs to snapshot one dashboard.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub org_id: OrgId,
    pub dashboard_uid: String,
    pub range: ResolvedRange,
    /// IANA name passed through so the dashboard renders in local time.
    pub timezone: String,
    pub variables: BTreeMap<String, String>,
    pub format: ReportFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutput {
    pub bytes: Vec<u8>,
    pub page_count: u32,
}

/// Turns a dashboard reference into report bytes.
///
/// Implementations hold no per-run state; the executor enforces the overall
/// timeout and the single retry.
#[async_trait]
pub trait Renderer: Send + Sync {
    fn name(&self) -> &str;

    async fn render(
        &self,
        req: &RenderRequest,
        settings: &RendererSettings,
    ) -> Result<RenderOutput, RenderError>;
}
