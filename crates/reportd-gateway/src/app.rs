use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use reportd_core::config::ReportdConfig;
use reportd_scheduler::{ConcurrencyGate, ScheduleService, SettingsCache};
use std::sync::Arc;

use crate::http::{health, runs, schedules, settings};

/// Central shared state, passed as `Arc<AppState>` to all Axum handlers.
pub struct AppState {
    pub config: ReportdConfig,
    pub schedules: ScheduleService,
    pub settings: Arc<SettingsCache>,
    /// Read-only here; the executor holds the same gate.
    pub gate: Arc<ConcurrencyGate>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: ReportdConfig,
        schedules: ScheduleService,
        settings: Arc<SettingsCache>,
        gate: Arc<ConcurrencyGate>,
    ) -> Self {
        Self {
            config,
            schedules,
            settings,
            gate,
            started_at: Utc::now(),
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/schedules",
            get(schedules::list_schedules).post(schedules::create_schedule),
        )
        .route(
            "/schedules/{id}",
            get(schedules::get_schedule)
                .put(schedules::update_schedule)
                .delete(schedules::delete_schedule),
        )
        .route("/schedules/{id}/run", post(schedules::trigger_run))
        .route("/schedules/{id}/runs", get(schedules::list_runs))
        .route("/runs/{id}", get(runs::get_run))
        .route("/runs/{id}/artifact", get(runs::download_artifact))
        .route(
            "/settings",
            get(settings::get_settings)
                .post(settings::save_settings)
                .delete(settings::reset_settings),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
