//! Error taxonomy and its HTTP mapping.
//!
//! | Variant | Status | Raised by |
//! |---------|--------|-----------|
//! | `NotFound` | 404 | any lookup of a topic, concept, activity, or resource |
//! | `Validation` | 400 | out-of-range score, unknown status, malformed request body |
//! | `Generation` | 500 | the generative backend, including unparseable payloads |
//! | `Ingestion` | 400 | PDF or URL text extraction |
//! | `Database` / `Internal` | 500 | storage failures |
//!
//! Every error response has the body `{"detail": "<message>"}`. The
//! synchronizer never downgrades an adapter error; it reaches the caller
//! with its original cause.

use axum::{
    extract::multipart::MultipartError,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use autodidact_core::models::{ParseEnumError, ScoreError};

use crate::generation::GenerationError;
use crate::ingest::IngestError;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Validation(String),

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("ingestion failed: {0}")]
    Ingestion(#[from] IngestError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        AppError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::Ingestion(_) => StatusCode::BAD_REQUEST,
            AppError::Generation(_) | AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ScoreError> for AppError {
    fn from(e: ScoreError) -> Self {
        AppError::Validation(e.to_string())
    }
}

impl From<ParseEnumError> for AppError {
    fn from(e: ParseEnumError) -> Self {
        AppError::Validation(e.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(e: JsonRejection) -> Self {
        AppError::Validation(e.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(e: QueryRejection) -> Self {
        AppError::Validation(e.body_text())
    }
}

impl From<MultipartError> for AppError {
    fn from(e: MultipartError) -> Self {
        AppError::Validation(format!("invalid multipart payload: {}", e.body_text()))
    }
}

/// JSON error body returned for every failed request.
#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        let body = ErrorBody {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autodidact_core::models::validate_score;
    use autodidact_core::payload::PayloadError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::not_found("Topic", "abc").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(IngestError::Empty).status(),
            StatusCode::BAD_REQUEST
        );
        let payload = PayloadError::MissingField {
            entity: "topic",
            field: "title",
        };
        assert_eq!(
            AppError::from(GenerationError::from(payload)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_score_error_is_validation() {
        let err: AppError = validate_score(6).unwrap_err().into();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(err.to_string().contains("between 1 and 5"));
    }

    #[test]
    fn test_not_found_message_names_entity() {
        assert_eq!(
            AppError::not_found("Activity", "a-1").to_string(),
            "Activity not found: a-1"
        );
    }
}
