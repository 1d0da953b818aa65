pub mod api;
pub mod config;
pub mod services;
pub mod utils;

use crate::config::RelayConfig;
use crate::services::relay::DownstreamRelay;
use crate::services::staging::StagingStore;
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;

/// Slack for multipart boundaries and text fields on top of the file bytes
const MULTIPART_OVERHEAD: usize = 10 * 1024 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::upload::upload_single,
        api::handlers::upload::upload_batch,
        api::handlers::health::health_check,
        api::handlers::health::stats,
    ),
    components(
        schemas(
            api::handlers::upload::SingleUploadForm,
            api::handlers::upload::BatchUploadForm,
            api::handlers::upload::SingleUploadResponse,
            api::handlers::upload::BatchUploadResponse,
            api::handlers::health::HealthResponse,
            api::handlers::health::StatsResponse,
        )
    ),
    tags(
        (name = "upload", description = "PDF relay endpoints"),
        (name = "system", description = "Health and staging introspection")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub staging: Arc<StagingStore>,
    pub relay: Arc<dyn DownstreamRelay>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: Arc<RelayConfig>,
        staging: Arc<StagingStore>,
        relay: Arc<dyn DownstreamRelay>,
    ) -> Self {
        Self {
            config,
            staging,
            relay,
            started_at: Instant::now(),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let max_file_size = usize::try_from(state.config.max_file_size).unwrap_or(usize::MAX);
    let single_limit = max_file_size.saturating_add(MULTIPART_OVERHEAD);
    let batch_limit = max_file_size
        .saturating_mul(state.config.max_batch_files)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/health", get(api::handlers::health::health_check))
        .route("/stats", get(api::handlers::health::stats))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .route(
            "/api/upload",
            post(api::handlers::upload::upload_single).layer(DefaultBodyLimit::max(single_limit)),
        )
        .route(
            "/api/upload-batch",
            post(api::handlers::upload::upload_batch).layer(DefaultBodyLimit::max(batch_limit)),
        )
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .with_state(state)
}
