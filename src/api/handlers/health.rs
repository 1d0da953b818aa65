use crate::AppState;
use crate::api::error::AppError;
use crate::utils::format::format_megabytes;
use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    /// Seconds since the process started
    pub uptime: f64,
    pub downstream_configured: bool,
    pub version: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub files_waiting: usize,
    pub temp_dir: String,
    pub max_file_size: String,
    pub max_batch_files: usize,
    pub downstream_endpoint: String,
    pub environment: String,
    #[serde(rename = "totalSizeMB")]
    pub total_size_mb: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        uptime: state.started_at.elapsed().as_secs_f64(),
        downstream_configured: !state.config.downstream_url.trim().is_empty(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/stats",
    responses(
        (status = 200, description = "Staging usage snapshot", body = StatsResponse),
        (status = 500, description = "Staging directory could not be read")
    ),
    tag = "system"
)]
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AppError> {
    let usage = state.staging.usage().await?;

    Ok(Json(StatsResponse {
        files_waiting: usage.files_waiting,
        temp_dir: state.staging.dir().display().to_string(),
        max_file_size: format!("{}MB", state.config.max_file_size_mb()),
        max_batch_files: state.config.max_batch_files,
        downstream_endpoint: state.config.redacted_endpoint(),
        environment: state.config.environment.clone(),
        total_size_mb: format_megabytes(usage.total_bytes),
    }))
}
