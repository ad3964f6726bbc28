//! Per-organization settings: read, replace, reset.
//!
//! SMTP passwords never leave the process. Responses carry [`REDACTED`] in
//! their place, and a save that sends [`REDACTED`] back keeps the stored
//! password.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use reportd_core::Settings;
use std::sync::Arc;

use crate::app::AppState;
use crate::http::error::{api_error, caller, parse_body, ApiError};

pub const REDACTED: &str = "********";

fn redact(settings: &Settings) -> Settings {
    let mut out = settings.clone();
    if let Some(smtp) = out.smtp.as_mut() {
        if !smtp.password.is_empty() {
            smtp.password = REDACTED.to_string();
        }
    }
    out
}

/// GET /settings
pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Settings>, ApiError> {
    let c = caller(&headers)?;
    let settings = state.settings.get(c.org_id).map_err(api_error)?;
    Ok(Json(redact(&settings)))
}

/// POST /settings: replace the whole settings document.
pub async fn save_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Settings>, ApiError> {
    let c = caller(&headers)?;
    let mut incoming: Settings = parse_body(&body)?;

    if let Some(smtp) = incoming.smtp.as_mut() {
        if smtp.password == REDACTED {
            let current = state.settings.get(c.org_id).map_err(api_error)?;
            smtp.password = current
                .smtp
                .as_ref()
                .map(|s| s.password.clone())
                .unwrap_or_default();
        }
    }

    let saved = state.settings.save(c.org_id, incoming).map_err(api_error)?;
    Ok(Json(redact(&saved)))
}

/// DELETE /settings: back to defaults.
pub async fn reset_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Settings>, ApiError> {
    let c = caller(&headers)?;
    let settings = state.settings.reset(c.org_id).map_err(api_error)?;
    Ok(Json(redact(&settings)))
}
