use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gridfs_store::GridFsError;
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("request failed: {}", self.message);
        }

        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<GridFsError> for AppError {
    fn from(err: GridFsError) -> Self {
        let status = match &err {
            GridFsError::NotFound(_) => StatusCode::NOT_FOUND,
            GridFsError::OutOfRange { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            GridFsError::Overflow { .. } | GridFsError::TooLarge { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            GridFsError::Incomplete { .. } => StatusCode::CONFLICT,
            GridFsError::Worker(_) => StatusCode::SERVICE_UNAVAILABLE,
            GridFsError::Corrupt { .. }
            | GridFsError::InvalidBucketName { .. }
            | GridFsError::InvalidChunkSize(_)
            | GridFsError::Sqlx(_)
            | GridFsError::Io(_)
            | GridFsError::Metadata(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}
