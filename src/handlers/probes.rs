use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

use super::AppState;

/// Liveness probe
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "logpulse",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

/// Readiness probe: ready once the batch scheduler is running
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let processing = state.processor.is_processing();
    let status = if processing {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if processing { "ready" } else { "not_ready" },
            "service": "logpulse",
            "processing": processing,
        })),
    )
}
