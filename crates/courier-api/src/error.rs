//! Courier service error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use courier_core::broker::BrokerError;
use courier_core::error::DomainError;
use courier_pipeline::domain::validator::ValidationError;
use courier_pipeline::error::PipelineError;
use serde::Serialize;
use thiserror::Error;

/// Startup and runtime errors for the service process.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migrations could not be applied.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The broker could not be reached.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// A pipeline component failed to start.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Network binding or I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),

    /// The tracing exporter could not be built.
    #[error("telemetry error: {0}")]
    Telemetry(String),
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
}

/// HTTP-layer wrapper around `PipelineError` that implements `IntoResponse`.
#[derive(Debug)]
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self(PipelineError::Store(err))
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self(PipelineError::Validation(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self.0 {
            PipelineError::Validation(_) | PipelineError::Store(DomainError::Validation(_)) => {
                (StatusCode::BAD_REQUEST, "validation_error")
            }
            PipelineError::Store(DomainError::EventNotFound(_)) => {
                (StatusCode::NOT_FOUND, "event_not_found")
            }
            PipelineError::Store(DomainError::DuplicateEvent(_)) => {
                (StatusCode::CONFLICT, "duplicate_event")
            }
            PipelineError::Broker(_) => (StatusCode::BAD_GATEWAY, "broker_error"),
            PipelineError::Store(DomainError::Infrastructure(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "infrastructure_error")
            }
            PipelineError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "encoding_error")
            }
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }

        let body = ErrorBody {
            error: error_code,
            message: self.0.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use uuid::Uuid;

    fn status_of(err: impl Into<ApiError>) -> StatusCode {
        let response = err.into().into_response();
        response.status()
    }

    #[test]
    fn test_event_not_found_maps_to_404() {
        assert_eq!(
            status_of(DomainError::EventNotFound(Uuid::new_v4())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_duplicate_event_maps_to_409() {
        assert_eq!(
            status_of(DomainError::DuplicateEvent(Uuid::new_v4())),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_validation_maps_to_400() {
        assert_eq!(status_of(ValidationError::EmptySource), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(DomainError::Validation("bad input".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_broker_failure_maps_to_502() {
        assert_eq!(
            status_of(PipelineError::Broker(BrokerError::NotConnected)),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_infrastructure_maps_to_500() {
        assert_eq!(
            status_of(DomainError::Infrastructure("db down".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_error_body_carries_code_and_message() {
        let response = ApiError::from(ValidationError::EmptySource).into_response();

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"], "validation_error");
        assert!(json["message"].as_str().unwrap().contains("source"));
    }
}
