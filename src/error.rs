//! Gateway error types with HTTP status code mapping.
//!
//! [`FleetError`] is the central error type for the gateway. Each variant
//! maps to a specific HTTP status code and structured JSON error response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::domain::SubscriberId;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "invalid request: latitude out of range",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                |
/// |-----------|-----------------|----------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request            |
/// | 2000–2999 | Not Found       | 404 Not Found              |
/// | 3000–3999 | Server / Store  | 500 / 503                  |
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    /// Device with the given ID does not exist in the store.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The store could not be queried (connection, pool, or SQL failure).
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A single row could not be decoded into its domain type.
    #[error("row decode failed: {0}")]
    RowDecode(String),

    /// A subscriber refused a frame because its connection is gone.
    #[error("subscriber {0} is closed")]
    SubscriberClosed(SubscriberId),

    /// The change-notification subscription was lost.
    #[error("change subscription lost: {0}")]
    SubscriptionLost(String),

    /// Snapshot or response encoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FleetError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::DeviceNotFound(_) => 2001,
            Self::Internal(_) => 3000,
            Self::StoreUnavailable(_) => 3001,
            Self::RowDecode(_) => 3002,
            Self::SubscriberClosed(_) => 3003,
            Self::SubscriptionLost(_) => 3004,
            Self::Serialization(_) => 3005,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::DeviceNotFound(_) => StatusCode::NOT_FOUND,
            Self::StoreUnavailable(_) | Self::SubscriptionLost(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::RowDecode(_)
            | Self::SubscriberClosed(_)
            | Self::Serialization(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for FleetError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::RowDecode(err.to_string())
            }
            other => Self::StoreUnavailable(other.to_string()),
        }
    }
}

impl IntoResponse for FleetError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.error_code(), error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
