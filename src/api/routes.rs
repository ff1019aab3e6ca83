use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use super::handlers::{health, recording};
use super::state::AppState;
use super::websocket::ws_handler;

pub fn create_router(state: Arc<AppState>) -> Router {
    // SECURITY: Restrict CORS to localhost only - sidecar should only be accessed locally
    let cors = CorsLayer::new()
        .allow_origin([
            "http://localhost:1420".parse::<HeaderValue>().unwrap(),
            "http://localhost:5173".parse::<HeaderValue>().unwrap(),
            "http://127.0.0.1:1420".parse::<HeaderValue>().unwrap(),
            "http://127.0.0.1:5173".parse::<HeaderValue>().unwrap(),
            "tauri://localhost".parse::<HeaderValue>().unwrap(),
            "https://tauri.localhost".parse::<HeaderValue>().unwrap(),
        ])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any);

    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Recording endpoints (spec.md §6 control surface)
        .route("/recording/start", post(recording::start_recording))
        .route("/recording/:session_id/pause", post(recording::pause_recording))
        .route("/recording/:session_id/resume", post(recording::resume_recording))
        .route("/recording/:session_id/stop", post(recording::stop_recording))
        .route("/recording/:session_id/cancel", post(recording::cancel_recording))
        .route("/recording/:session_id/status", get(recording::get_recording_status))
        // WebSocket: timeline broadcast for UI (spec.md §6 `timeline_update`)
        .route("/ws/:client_id", get(ws_handler))
        .layer(cors)
        .with_state(state)
}
