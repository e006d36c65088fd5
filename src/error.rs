use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::analyzer::AnalyzeError;
use crate::storage::StorageError;

/// Crate-wide error taxonomy, per §7. Used directly by the plain CRUD
/// handlers (where it becomes an HTTP response); the streaming pipeline
/// (C6) catches these internally and turns them into `error` SSE events
/// instead, since the HTTP response has already started by the time they
/// can occur there.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("metadata store error: {0}")]
    Metadata(#[from] sqlx::Error),
    #[error("analyzer error: {0}")]
    Analyzer(#[from] AnalyzeError),
    #[error("not found")]
    NotFound,
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Storage(_) | AppError::Metadata(_) | AppError::Analyzer(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if matches!(status, StatusCode::INTERNAL_SERVER_ERROR) {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorBody {
            detail: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
