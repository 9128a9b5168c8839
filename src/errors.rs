use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Failure taxonomy of the share lifecycle engine.
///
/// These never cross into the transport layer as errors; the engine folds
/// them into an error-sentinel [`Share`](crate::models::share::Share).
#[derive(Debug, Error)]
pub enum ShareError {
    /// The key did not decode, or the record or blob is absent.
    #[error("{0}")]
    NotFound(String),
    /// A storage or metadata call failed for a reason other than absence.
    #[error("{0}")]
    BackendUnavailable(String),
    /// One blob of an upload batch could not be registered.
    #[error("{0}")]
    PartialUploadFailure(String),
}

/// Discriminant kept on error sentinels so the transport can pick a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareErrorKind {
    NotFound,
    BackendUnavailable,
    PartialUploadFailure,
}

impl ShareError {
    pub fn kind(&self) -> ShareErrorKind {
        match self {
            ShareError::NotFound(_) => ShareErrorKind::NotFound,
            ShareError::BackendUnavailable(_) => ShareErrorKind::BackendUnavailable,
            ShareError::PartialUploadFailure(_) => ShareErrorKind::PartialUploadFailure,
        }
    }
}

impl ShareErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ShareErrorKind::NotFound => StatusCode::NOT_FOUND,
            ShareErrorKind::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ShareErrorKind::PartialUploadFailure => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

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

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 403 Forbidden
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
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
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
    }
}

impl From<ShareError> for AppError {
    fn from(err: ShareError) -> Self {
        AppError::new(err.kind().status(), err.to_string())
    }
}
