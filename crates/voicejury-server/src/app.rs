//! Router assembly

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::routes;
use crate::sse;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/session/start", post(routes::start_session))
        .route(
            "/api/session/{session_id}/upload-recording",
            post(routes::upload_recording),
        )
        .route(
            "/api/session/{session_id}/analyze",
            post(routes::start_analysis),
        )
        .route(
            "/api/session/{session_id}/status",
            get(routes::session_status),
        )
        .route(
            "/api/session/{session_id}/results",
            get(routes::session_results),
        )
        .route(
            "/api/session/{session_id}/stream",
            get(sse::stream_session_events),
        )
        .route(
            "/api/session/{session_id}/lyrics-offset",
            get(routes::get_lyrics_offset).post(routes::set_lyrics_offset),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
