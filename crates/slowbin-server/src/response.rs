//! Error responses.
//!
//! Every failure that happens before the first byte is sent becomes a JSON
//! body of the form `{"message": ..., "reason": ...}` where `reason` is a
//! stable machine-readable code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use slowbin_core::SlowbinError;
use tracing::error;

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub reason: &'static str,
}

/// An error ready to be sent to the client.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                message: message.into(),
                reason,
            },
        }
    }

    /// The rate path segment is not a non-negative integer.
    pub fn bad_rate(raw: &str) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "bad_rate",
            format!("Rate must be a whole number of seconds, got '{}'", raw),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn reason(&self) -> &'static str {
        self.body.reason
    }
}

impl From<SlowbinError> for ApiError {
    fn from(err: SlowbinError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
        if status.is_server_error() {
            error!("Request failed: {}", err);
        }
        Self::new(status, err.reason_code(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
