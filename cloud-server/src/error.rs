//! Error handling

use axum::{
    response::{IntoResponse, Response},
    http::StatusCode,
    Json,
};
use serde_json::json;

use appcompat_core::PipelineError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub enum AppError {
    // Resource errors
    NotFound(String),
    AlreadyExists(String),

    // Validation errors
    ValidationError(String),
    QuerySyntax { message: String, query: String },

    // Another cycle owns the collection
    Busy(String),

    // Database errors
    DatabaseError(String),

    // Generic errors
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.as_str()),
            AppError::AlreadyExists(msg) => (StatusCode::CONFLICT, msg.as_str()),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.as_str()),
            AppError::QuerySyntax { message, query } => {
                let body = Json(json!({
                    "error": message,
                    "status": StatusCode::BAD_REQUEST.as_u16(),
                    "query": query,
                }));
                return (StatusCode::BAD_REQUEST, body).into_response();
            }
            AppError::Busy(msg) => (StatusCode::CONFLICT, msg.as_str()),
            AppError::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error occurred")
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::QuerySyntax { message, query } => AppError::QuerySyntax { message, query },
            PipelineError::NotFound(what) => AppError::NotFound(what),
            PipelineError::CollectionExists(name) => AppError::AlreadyExists(name),
            PipelineError::CycleInProgress(_) => AppError::Busy(err.to_string()),
            PipelineError::Store(msg) => AppError::DatabaseError(msg),
            other => AppError::InternalError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_mapping() {
        let err: AppError = PipelineError::query_syntax("unknown field 'x'", "x:1").into();
        assert!(matches!(err, AppError::QuerySyntax { .. }));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let err: AppError = PipelineError::CycleInProgress("appcompat-a".into()).into();
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);

        let err: AppError = PipelineError::NotFound("record".into()).into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let err: AppError = PipelineError::TrainingSetEmpty("appcompat-a".into()).into();
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
