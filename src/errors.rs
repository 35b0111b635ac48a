use crate::services::{build_service::ServiceError, staging_service::StagingError};
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Error returned by every handler: an HTTP status, a stable code and a message.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status, code and message.
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
        }
    }

    /// Shortcut for a 400 Bad Request
    pub fn bad_request(code: &'static str, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, msg)
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(code: &'static str, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("{} ({})", self, self.status);
        } else {
            tracing::debug!("{} ({})", self, self.status);
        }

        let body = Json(json!({
            "code": self.code,
            "message": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::Validation(inner) => AppError::bad_request(inner.code(), message),
            ServiceError::Staging(StagingError::TooLarge { .. }) => {
                AppError::new(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", message)
            }
            ServiceError::Staging(StagingError::Body(_)) => {
                AppError::bad_request("invalid_multipart", message)
            }
            ServiceError::MediaUpload(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, "media_upload_failed", message)
            }
            ServiceError::Dispatch(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, "dispatch_failed", message)
            }
            ServiceError::StatusQuery(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, "status_query_failed", message)
            }
            ServiceError::NotFound(_) => AppError::not_found("build_not_found", message),
            ServiceError::Staging(StagingError::Io(_))
            | ServiceError::Io(_)
            | ServiceError::Task(_) => AppError::internal(message),
        }
    }
}

impl From<StagingError> for AppError {
    fn from(err: StagingError) -> Self {
        ServiceError::from(err).into()
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        let status = err.status();
        let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
            "payload_too_large"
        } else {
            "invalid_multipart"
        };
        AppError::new(status, code, err.body_text())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
