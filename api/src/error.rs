use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use glyphkit_core::error::{self, ApiError};
use glyphkit_core::reconciler::{ReconcileError, StoreError};

use crate::metadata::MetadataError;

/// Internal error type that converts to structured API responses.
///
/// The reconciler's outcome taxonomy maps onto this through a fixed table:
/// schema violations and rejected persists are the caller's 400s, a closed
/// detection window is a 404, and anything unexpected collapses into a
/// generic 500 with no detail leaked past the log line.
#[derive(Debug)]
pub enum AppError {
    /// Malformed or out-of-contract request body (400)
    Schema { message: String },
    /// Detection mode is not open (404)
    NotActive,
    /// The settings store rejected the write (400)
    PersistFailed,
    /// Missing or wrong bearer token (401)
    Unauthorized { message: String },
    /// The metadata service rejected the query (400)
    UpstreamRejected { message: String },
    /// Unexpected internal fault (500)
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, code, message) = match self {
            AppError::Schema { message } => {
                (StatusCode::BAD_REQUEST, error::codes::SCHEMA_INVALID, message)
            }
            AppError::NotActive => (
                StatusCode::NOT_FOUND,
                error::codes::NOT_ACTIVE,
                "conflict detection is not active".to_string(),
            ),
            AppError::PersistFailed => (
                StatusCode::BAD_REQUEST,
                error::codes::PERSIST_FAILED,
                "failed to persist conflict detection settings".to_string(),
            ),
            AppError::Unauthorized { message } => {
                (StatusCode::UNAUTHORIZED, error::codes::UNAUTHORIZED, message)
            }
            AppError::UpstreamRejected { message } => (
                StatusCode::BAD_REQUEST,
                error::codes::UPSTREAM_REJECTED,
                message,
            ),
            AppError::Internal(detail) => {
                tracing::error!(request_id = %request_id, "internal error: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error::codes::INTERNAL_ERROR,
                    "an internal error occurred".to_string(),
                )
            }
        };

        let body = ApiError {
            error: code.to_string(),
            message,
            request_id,
        };
        (status, Json(body)).into_response()
    }
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Schema(violation) => AppError::Schema {
                message: violation.to_string(),
            },
            ReconcileError::NotActive => AppError::NotActive,
            ReconcileError::PersistFailed => AppError::PersistFailed,
            ReconcileError::Store(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<MetadataError> for AppError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::Rejected { status, body } => AppError::UpstreamRejected {
                message: format!("metadata service rejected the query ({status}): {body}"),
            },
            MetadataError::Unavailable(detail) => AppError::Internal(detail),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(format!("database error: {err}"))
    }
}
