use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use reportd_core::{Run, RunId};
use std::sync::Arc;

use crate::app::AppState;
use crate::http::error::{api_error, caller, ApiError};

/// GET /runs/{id}
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<RunId>,
) -> Result<Json<Run>, ApiError> {
    let c = caller(&headers)?;
    state.schedules.get_run(c.org_id, id).map(Json).map_err(api_error)
}

/// GET /runs/{id}/artifact: the rendered report as a download.
///
/// 404 when the run never produced an artifact or the file has expired.
pub async fn download_artifact(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<RunId>,
) -> Result<Response, ApiError> {
    let c = caller(&headers)?;
    let download = state
        .schedules
        .artifact(c.org_id, id)
        .await
        .map_err(api_error)?;

    Ok((
        [
            (
                header::CONTENT_TYPE,
                download.format.content_type().to_string(),
            ),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", download.file_name),
            ),
        ],
        download.bytes,
    )
        .into_response())
}
