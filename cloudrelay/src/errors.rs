use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid request data
    #[error("{message}")]
    BadRequest { message: String },

    /// Nothing matched the request
    #[error("{message}")]
    NotFound { message: String },

    /// Upload exceeded the configured size limit
    #[error("{message}")]
    PayloadTooLarge { message: String },

    /// Client exceeded its request allowance for the current window
    #[error("{message}")]
    TooManyRequests { message: String, retry_after_secs: u64 },

    /// An upstream provider call failed. `details` is exposed to the caller when present.
    #[error("{error}{}", .details.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    Upstream { error: String, details: Option<String> },

    /// The chat provider connectivity check failed
    #[error("API test failed: {message}")]
    ApiTest {
        message: String,
        code: Option<String>,
        kind: Option<String>,
    },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Upstream { .. } | Error::ApiTest { .. } | Error::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::BadRequest { message }
            | Error::NotFound { message }
            | Error::PayloadTooLarge { message }
            | Error::TooManyRequests { message, .. } => message.clone(),
            Error::Upstream { error, .. } => error.clone(),
            Error::ApiTest { message, .. } => message.clone(),
            Error::Internal { .. } => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Upstream { .. } | Error::ApiTest { .. } | Error::Internal { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::TooManyRequests { .. } => {
                tracing::info!("Rate limited: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } | Error::PayloadTooLarge { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();

        match self {
            Error::Upstream {
                error,
                details: Some(details),
            } => (status, Json(json!({ "error": error, "details": details }))).into_response(),
            Error::ApiTest { message, code, kind } => (
                status,
                Json(json!({
                    "status": "error",
                    "error": message,
                    "code": code,
                    "type": kind,
                })),
            )
                .into_response(),
            Error::TooManyRequests {
                message,
                retry_after_secs,
            } => {
                let mut response = (status, Json(json!({ "error": message }))).into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
                response
            }
            other => (status, Json(json!({ "error": other.user_message() }))).into_response(),
        }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
