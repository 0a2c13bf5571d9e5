//! JSON error responses shared by both HTTP services

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::Error;
use crate::tts::SpeechServiceError;

/// An error answered as `{"error": message}`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// 401 for requests without a valid session
    #[must_use]
    pub fn not_logged_in() -> Self {
        Self::unauthorized("not logged in")
    }

    /// 403 for conversations the caller does not own
    #[must_use]
    pub fn conversation_denied() -> Self {
        Self::forbidden("conversation not found or access denied")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
        }

        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound(msg) => Self::not_found(msg),
            Error::Conflict(msg) => Self::conflict(msg),
            Error::BadRequest(msg) => Self::bad_request(msg),
            Error::Auth(msg) => Self::unauthorized(msg),
            other => {
                tracing::error!(error = %other, "request failed");
                Self::internal(other.to_string())
            }
        }
    }
}

impl From<SpeechServiceError> for ApiError {
    fn from(e: SpeechServiceError) -> Self {
        match e {
            SpeechServiceError::Unavailable => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            SpeechServiceError::Timeout => Self::new(StatusCode::GATEWAY_TIMEOUT, e.to_string()),
            SpeechServiceError::Upstream { status, message } => Self::new(
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                message,
            ),
            SpeechServiceError::Other(msg) => Self::internal(msg),
        }
    }
}
