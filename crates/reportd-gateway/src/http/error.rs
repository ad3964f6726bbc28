use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use reportd_core::{OrgId, ReportdError};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{error, warn};

/// Error half of every handler result: status plus `{"error", "code"}`.
pub type ApiError = (StatusCode, Json<Value>);

pub fn status_for(e: &ReportdError) -> StatusCode {
    match e {
        // Limit breaches are validation failures; the code tells them apart.
        ReportdError::Validation(_) | ReportdError::LimitExceeded(_) => StatusCode::BAD_REQUEST,
        ReportdError::NotFound { .. } => StatusCode::NOT_FOUND,
        ReportdError::Conflict(_) => StatusCode::CONFLICT,
        ReportdError::Config(_)
        | ReportdError::Database(_)
        | ReportdError::Serialization(_)
        | ReportdError::Io(_)
        | ReportdError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn api_error(e: ReportdError) -> ApiError {
    let status = status_for(&e);
    if status.is_server_error() {
        error!(code = e.code(), "request failed: {e}");
    }
    (
        status,
        Json(json!({"error": e.to_string(), "code": e.code()})),
    )
}

fn bad_request(message: String) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": message, "code": "VALIDATION_ERROR"})),
    )
}

/// Parse a JSON request body, answering malformed input with a 400.
pub fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        warn!(error = %e, "invalid JSON body");
        bad_request(format!("invalid JSON body: {e}"))
    })
}

/// Who is calling. Host authentication is out of scope; the headers are
/// trusted as given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub org_id: OrgId,
    pub user_id: i64,
}

pub const ORG_HEADER: &str = "x-org-id";
pub const USER_HEADER: &str = "x-user-id";

fn id_header(headers: &HeaderMap, name: &str) -> Result<i64, ApiError> {
    match headers.get(name) {
        None => Ok(1),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .ok_or_else(|| bad_request(format!("header {name} must be a positive integer"))),
    }
}

pub fn caller(headers: &HeaderMap) -> Result<Caller, ApiError> {
    Ok(Caller {
        org_id: id_header(headers, ORG_HEADER)?,
        user_id: id_header(headers, USER_HEADER)?,
    })
}
