//! Schedule resources: CRUD, manual trigger, run history.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use reportd_core::{Run, Schedule, ScheduleDraft, ScheduleId};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::app::AppState;
use crate::http::error::{api_error, caller, parse_body, ApiError};

/// GET /schedules
pub async fn list_schedules(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Schedule>>, ApiError> {
    let c = caller(&headers)?;
    state.schedules.list(c.org_id).map(Json).map_err(api_error)
}

/// POST /schedules: 201 with the stored schedule.
pub async fn create_schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Schedule>), ApiError> {
    let c = caller(&headers)?;
    let draft: ScheduleDraft = parse_body(&body)?;
    let schedule = state
        .schedules
        .create(c.org_id, c.user_id, draft)
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

/// GET /schedules/{id}
pub async fn get_schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<ScheduleId>,
) -> Result<Json<Schedule>, ApiError> {
    let c = caller(&headers)?;
    state.schedules.get(c.org_id, id).map(Json).map_err(api_error)
}

/// PUT /schedules/{id}: full replacement of the editable fields.
pub async fn update_schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<ScheduleId>,
    body: Bytes,
) -> Result<Json<Schedule>, ApiError> {
    let c = caller(&headers)?;
    let draft: ScheduleDraft = parse_body(&body)?;
    state
        .schedules
        .update(c.org_id, id, draft)
        .map(Json)
        .map_err(api_error)
}

/// DELETE /schedules/{id}: 204; 409 while a run is in flight.
pub async fn delete_schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<ScheduleId>,
) -> Result<StatusCode, ApiError> {
    let c = caller(&headers)?;
    state
        .schedules
        .delete(c.org_id, id)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /schedules/{id}/run: queue a manual run and return at once.
pub async fn trigger_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<ScheduleId>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let c = caller(&headers)?;
    let run = state
        .schedules
        .trigger(c.org_id, id)
        .await
        .map_err(api_error)?;
    info!(org_id = c.org_id, user_id = c.user_id, schedule_id = id, run_id = run.id, "manual run requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"run_id": run.id, "status": run.status})),
    ))
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<usize>,
}

/// GET /schedules/{id}/runs?limit=N: newest first.
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<ScheduleId>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<Run>>, ApiError> {
    let c = caller(&headers)?;
    state
        .schedules
        .runs(c.org_id, id, query.limit)
        .map(Json)
        .map_err(api_error)
}
