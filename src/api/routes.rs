//! API route definitions
//!
//! - GET  /ping           - liveness, no dependencies
//! - GET  /health         - uptime, models loaded, MQTT connected
//! - GET  /status         - collaborator flags and pipeline counters
//! - GET  /debug/config   - redacted configuration
//! - POST /process-face   - extraction only (multipart `image`)
//! - POST /process-frame  - full pipeline run (multipart `image`)

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{self, GatewayState};

pub fn api_routes(state: GatewayState) -> Router {
    Router::new()
        .route("/ping", get(handlers::ping))
        .route("/health", get(handlers::get_health))
        .route("/status", get(handlers::get_status))
        .route("/debug/config", get(handlers::get_debug_config))
        .route("/process-face", post(handlers::process_face))
        .route("/process-frame", post(handlers::process_frame))
        .with_state(state)
}
