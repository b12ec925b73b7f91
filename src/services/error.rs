//! Error handling utilities for route handlers

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::platforms::PlatformError;
use crate::services::schedule::ScheduleError;
use crate::storage::BlobError;

/// Extension trait for logging errors and converting to StatusCode
pub trait LogErr<T> {
    /// Log error with context and return INTERNAL_SERVER_ERROR
    fn log_500(self, context: &str) -> Result<T, StatusCode>;

    /// Log error with context and return a custom StatusCode
    fn log_status(self, context: &str, status: StatusCode) -> Result<T, StatusCode>;
}

impl<T, E: std::fmt::Display> LogErr<T> for Result<T, E> {
    fn log_500(self, context: &str) -> Result<T, StatusCode> {
        self.map_err(|e| {
            tracing::error!(error = %e, "{}", context);
            StatusCode::INTERNAL_SERVER_ERROR
        })
    }

    fn log_status(self, context: &str, status: StatusCode) -> Result<T, StatusCode> {
        self.map_err(|e| {
            tracing::warn!(error = %e, status = status.as_u16(), "{}", context);
            status
        })
    }
}

/// Failures of the publish operations, mapped to HTTP at the route boundary
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    /// The retained video is gone; the caller must upload it again
    #[error("{0}")]
    BlobNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

impl From<BlobError> for PublishError {
    fn from(e: BlobError) -> Self {
        match e {
            BlobError::NotFound(path) => PublishError::BlobNotFound(format!(
                "Video file {} is no longer available. Please upload the video again.",
                path
            )),
            other => PublishError::Storage(other.to_string()),
        }
    }
}

impl From<ScheduleError> for PublishError {
    fn from(e: ScheduleError) -> Self {
        PublishError::Validation(e.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    requires_video: bool,
}

impl PublishError {
    pub fn status(&self) -> StatusCode {
        match self {
            PublishError::NotFound(_) => StatusCode::NOT_FOUND,
            PublishError::Validation(_) => StatusCode::BAD_REQUEST,
            PublishError::Forbidden(_) => StatusCode::FORBIDDEN,
            PublishError::Conflict(_) => StatusCode::CONFLICT,
            PublishError::BlobNotFound(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PublishError::Storage(_) | PublishError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PublishError::Platform(
                PlatformError::Validation(_) | PlatformError::NotConnected(_) | PlatformError::Unsupported { .. },
            ) => StatusCode::BAD_REQUEST,
            PublishError::Platform(PlatformError::ScopeInsufficient(_)) => StatusCode::FORBIDDEN,
            PublishError::Platform(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn requires_video(&self) -> bool {
        matches!(self, PublishError::BlobNotFound(_))
    }

    /// Text shown to the user; internal failures are not echoed back
    pub fn user_message(&self) -> String {
        match self {
            PublishError::Platform(e) => e.user_message(),
            PublishError::Database(_) | PublishError::Storage(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for PublishError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Publish request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Publish request rejected");
        }

        let body = ErrorBody {
            error: self.user_message(),
            requires_video: self.requires_video(),
        };
        (status, Json(body)).into_response()
    }
}
