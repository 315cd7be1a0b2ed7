//! API error envelope.
//!
//! Every tracking-API error renders as `{"error_code": ..., "message": ...}`
//! with a status from {400, 404, 409, 500}. Dashboard errors reuse the same
//! type before streaming begins; once a stream has started, errors become
//! log events and the stream is cut.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracklab_metadata::MetadataError;
use tracklab_storage::StorageError;

/// Wire-format error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error_code: String,
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidParameterValue(String),

    #[error("{0}")]
    ResourceDoesNotExist(String),

    #[error("{0}")]
    BadRequest(String),

    /// Param immutability violation; the message lists each conflicting
    /// {run, key, old, new}.
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Wire error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidParameterValue(_) | Self::Conflict(_) => "INVALID_PARAMETER_VALUE",
            Self::ResourceDoesNotExist(_) => "RESOURCE_DOES_NOT_EXIST",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidParameterValue(_) => StatusCode::BAD_REQUEST,
            Self::ResourceDoesNotExist(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<MetadataError> for ApiError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(msg) => Self::ResourceDoesNotExist(msg),
            MetadataError::AlreadyExists(msg) => Self::BadRequest(msg),
            MetadataError::InvalidQuery(msg) => Self::InvalidParameterValue(msg),
            conflict @ MetadataError::ParamConflict(_) => Self::Conflict(conflict.to_string()),
            other => {
                tracing::error!(error = %other, "metadata operation failed");
                Self::Internal(other.to_string())
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidPath(_) => {
                Self::InvalidParameterValue("provided 'path' parameter is invalid".to_string())
            }
            StorageError::NotFound(msg) => Self::ResourceDoesNotExist(msg),
            other => {
                tracing::error!(error = %other, "artifact storage operation failed");
                Self::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error_code: self.error_code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API services.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
