//! API error handling.
//!
//! Every failure leaves the API as a JSON body `{code, message}` with a status
//! derived from the engine's error kind.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use hlsmux_engine::{DownloadError, ErrorKind};
use serde::Serialize;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a 400 Bad Request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    /// Create a 504 Gateway Timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, "timeout", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Status code for an engine error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Selection | ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::Manifest | ErrorKind::SegmentFetch => StatusCode::BAD_GATEWAY,
        ErrorKind::Mux | ErrorKind::Io | ErrorKind::InvalidState => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl From<DownloadError> for ApiError {
    fn from(err: DownloadError) -> Self {
        let kind = err.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            tracing::error!(kind = %kind, error = %err, "Download request failed");
        } else {
            tracing::debug!(kind = %kind, error = %err, "Download request rejected");
        }
        Self::new(status, kind.as_str(), err.to_string())
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
