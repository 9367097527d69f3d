/// Error types for Avatar Service
///
/// This module defines all error types that can occur in the avatar-service.
/// Lookup failures are swallowed by the resolution cascade; everything else is
/// converted to an HTTP response or rendered on the save-error page.
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde_json::json;
use thiserror::Error;

/// Result type for avatar-service operations
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// Bytes are not a decodable JPEG, PNG or GIF image
    #[error("Decode error: {0}")]
    Decode(String),

    /// Crop or resize failed
    #[error("Transform error: {0}")]
    Transform(String),

    /// Requested or detected image format is not JPEG, PNG or GIF
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// I/O failure on read, write or rename
    #[error("Storage error: {0}")]
    Storage(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transport failure or unexpected status from a remote avatar service
    #[error("Remote lookup error: {0}")]
    RemoteLookup(String),

    /// No staged upload matches the confirmation token
    #[error("{0}")]
    Confirmation(String),

    /// Disallowed email domain or missing upload field
    #[error("Validation error: {0}")]
    Validation(String),

    /// Confirmation email could not be built or queued
    #[error("Mail error: {0}")]
    Mail(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Decode(_)
            | AppError::UnsupportedFormat(_)
            | AppError::Validation(_)
            | AppError::Confirmation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RemoteLookup(_) => StatusCode::BAD_GATEWAY,
            AppError::Transform(_)
            | AppError::Storage(_)
            | AppError::Mail(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let error_type = match self {
            AppError::Decode(_) | AppError::UnsupportedFormat(_) => "image_error",
            AppError::Validation(_) | AppError::Confirmation(_) => "validation_error",
            AppError::NotFound(_) => "not_found_error",
            AppError::RemoteLookup(_) => "upstream_error",
            _ => "server_error",
        };

        HttpResponse::build(status).json(json!({
            "error": status.canonical_reason().unwrap_or("Error"),
            "message": self.to_string(),
            "status": status.as_u16(),
            "type": error_type,
        }))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::RemoteLookup(err.to_string())
    }
}

impl From<lettre::error::Error> for AppError {
    fn from(err: lettre::error::Error) -> Self {
        AppError::Mail(err.to_string())
    }
}

impl From<lettre::address::AddressError> for AppError {
    fn from(err: lettre::address::AddressError) -> Self {
        AppError::Mail(format!("Invalid email address: {err}"))
    }
}

impl From<lettre::transport::smtp::Error> for AppError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        AppError::Mail(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Storage("disk".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_confirmation_message_is_bare() {
        let err = AppError::Confirmation("Confirmation period expired".into());
        assert_eq!(err.to_string(), "Confirmation period expired");
    }
}
