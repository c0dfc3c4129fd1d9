use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::error::AppError;
use crate::models::LogEntry;
use crate::processor::QueueStatus;

#[derive(Debug, Deserialize)]
pub struct LogBatch {
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub service_name: String,
}

/// POST /api/v1/logs/stream/{service}
pub async fn stream_logs(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Json(batch): Json<LogBatch>,
) -> Result<Json<Value>, AppError> {
    accept(&state, &service, batch.logs)
}

/// POST /api/v1/logs/stream/{service}/single
pub async fn stream_single_log(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Json(entry): Json<LogEntry>,
) -> Result<Json<Value>, AppError> {
    accept(&state, &service, vec![entry])
}

fn accept(state: &AppState, service: &str, logs: Vec<LogEntry>) -> Result<Json<Value>, AppError> {
    let receipt = state.processor.enqueue_batch(service, logs)?;

    Ok(Json(json!({
        "message": format!("Received {} logs for {}", receipt.accepted, service.trim()),
        "logs_received": receipt.accepted,
        "logs_dropped": receipt.dropped,
        "processing_started": state.processor.is_processing(),
        "timestamp": Utc::now(),
    })))
}

/// GET /api/v1/logs/services
pub async fn list_services(State(state): State<AppState>) -> Json<Value> {
    let services = state.processor.get_registered_services();
    Json(json!({
        "total": services.len(),
        "services": services,
    }))
}

/// POST /api/v1/logs/services/register
pub async fn register_service(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<Value>, AppError> {
    let created = state.processor.register_service(&request.service_name)?;
    Ok(Json(json!({
        "message": if created { "Service registered" } else { "Service already registered" },
        "service_name": request.service_name.trim(),
        "created": created,
    })))
}

/// DELETE /api/v1/logs/services/{service}
pub async fn unregister_service(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<Value>, AppError> {
    if !state.processor.unregister_service(&service) {
        return Err(AppError::ServiceNotFound(service));
    }
    Ok(Json(json!({
        "message": "Service unregistered",
        "service_name": service,
    })))
}

/// GET /api/v1/logs/queue/status
pub async fn queue_status(State(state): State<AppState>) -> Json<QueueStatus> {
    Json(state.processor.queue_status())
}
