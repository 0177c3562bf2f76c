//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::db::jobs;
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when deferred updates were dead-lettered
    pub status: String,
    /// Module name ("sam-dps")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Short git hash embedded at build time
    pub git_hash: String,
    pub build_timestamp: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    pub dead_letter_jobs: i64,
    /// Last error message if any (for diagnostics)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let mut last_error = state.last_error.read().await.clone();
    let dead_letter_jobs = match jobs::count_dead_letters(&state.db).await {
        Ok(count) => count,
        Err(e) => {
            last_error = Some(format!("health query failed: {}", e));
            0
        }
    };

    Json(HealthResponse {
        status: if dead_letter_jobs > 0 { "degraded" } else { "ok" }.to_string(),
        module: "sam-dps".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        uptime_seconds,
        dead_letter_jobs,
        last_error,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
