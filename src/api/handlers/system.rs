use axum::{extract::State, Json};
use chrono::Utc;

use crate::api::{
    state::AppState,
    types::{HealthResponse, PollerStatusResponse},
};

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: (Utc::now() - state.start_time).num_seconds(),
    })
}

/// GET /api/poller/status
pub async fn get_poller_status(State(state): State<AppState>) -> Json<PollerStatusResponse> {
    let Some(poller) = state.poller.as_ref() else {
        return Json(PollerStatusResponse {
            enabled: false,
            running: false,
            ticks: 0,
            last_run: None,
            last_report: None,
        });
    };

    let stats = poller.stats().await;
    Json(PollerStatusResponse {
        enabled: true,
        running: poller.is_running(),
        ticks: stats.ticks,
        last_run: stats.last_run,
        last_report: stats.last_report,
    })
}
