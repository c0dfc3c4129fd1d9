use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Application error types
#[derive(Debug)]
pub enum AppError {
    /// Configuration error
    ConfigError(String),
    /// Rejected at the ingress boundary (bad service name or batch)
    ValidationError(String),
    /// Service queue is at capacity and the overflow policy rejects new batches
    QueueFull { service: String, capacity: usize },
    /// Unknown service
    ServiceNotFound(String),
    /// Too many live dashboard connections
    CapacityExceeded(String),
    /// Internal server error
    InternalError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Self::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Self::QueueFull { service, capacity } => {
                write!(f, "Queue for {} is full (capacity {})", service, capacity)
            }
            Self::ServiceNotFound(name) => write!(f, "Service not found: {}", name),
            Self::CapacityExceeded(msg) => write!(f, "Capacity exceeded: {}", msg),
            Self::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::QueueFull { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ServiceNotFound(_) => StatusCode::NOT_FOUND,
            Self::CapacityExceeded(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": error_type_name(&self),
            }
        }));

        (status, body).into_response()
    }
}

pub(crate) fn error_type_name(error: &AppError) -> &'static str {
    match error {
        AppError::ConfigError(_) => "config_error",
        AppError::ValidationError(_) => "validation_error",
        AppError::QueueFull { .. } => "queue_full",
        AppError::ServiceNotFound(_) => "service_not_found",
        AppError::CapacityExceeded(_) => "capacity_exceeded",
        AppError::InternalError(_) => "internal_error",
    }
}

// Implement conversions from common error types
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::InternalError(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = AppError::ServiceNotFound("auth-service".to_string());
        assert_eq!(error.to_string(), "Service not found: auth-service");

        let error = AppError::QueueFull {
            service: "auth-service".to_string(),
            capacity: 10,
        };
        assert_eq!(error.to_string(), "Queue for auth-service is full (capacity 10)");
    }

    #[test]
    fn test_error_type_name() {
        assert_eq!(
            error_type_name(&AppError::ValidationError("test".to_string())),
            "validation_error"
        );
        assert_eq!(
            error_type_name(&AppError::ServiceNotFound("test".to_string())),
            "service_not_found"
        );
    }

    #[tokio::test]
    async fn test_error_response() {
        let response = AppError::ValidationError("Empty log batch".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = AppError::QueueFull {
            service: "svc".to_string(),
            capacity: 1,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
