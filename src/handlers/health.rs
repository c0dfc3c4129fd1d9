use axum::{
    extract::{Path, State},
    response::Json,
};

use super::AppState;
use crate::error::AppError;
use crate::models::SystemHealth;
use crate::processor::HealthView;

/// GET /api/v1/health
pub async fn system_health(State(state): State<AppState>) -> Json<SystemHealth> {
    Json(state.processor.system_health())
}

/// GET /api/v1/health/services
pub async fn all_services(State(state): State<AppState>) -> Result<Json<HealthView>, AppError> {
    Ok(Json(state.processor.get_service_health(None)?))
}

/// GET /api/v1/health/services/{service}
pub async fn service_health(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<HealthView>, AppError> {
    Ok(Json(state.processor.get_service_health(Some(&service))?))
}
