pub mod analyzer;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod handlers;
pub mod memory_sampler;
pub mod pipeline;
pub mod sse;
pub mod state;
pub mod storage;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use state::AppState;

/// Assemble the full HTTP surface: the streaming pipeline (§4.6/§4.7) plus
/// the plain CRUD handlers that complete the §6 API (SPEC_FULL.md's
/// "ambient stack" section). Exposed from the library root so integration
/// tests can drive it with `tower::ServiceExt::oneshot` without binding a
/// real socket.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = if state.config.allowed_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<axum::http::HeaderValue> = state
            .config
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    };

    Router::new()
        .route("/api/files/upload-sse", post(pipeline::upload_sse))
        .route("/api/files/upload", post(handlers::upload))
        .route("/api/files/", get(handlers::list_files))
        .route("/api/files/:id", get(handlers::get_file))
        .route("/api/files/:id", delete(handlers::delete_file))
        .route("/api/files/:id/preview", get(handlers::preview_file))
        .route(
            "/api/files/reference/:reference/report",
            get(handlers::get_report),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
