//! Error types for the prediction gateway.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::broker::BrokerError;
use crate::cache::CacheError;
use crate::preprocess::PreprocessError;

/// Failures surfaced by the dispatch gateway.
///
/// A missing result is not an error: `lookup_result` returns `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Caller input could not be processed. Never retried.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No reply within the bounded-wait window; callers may fall back to the deferred mode.
    #[error("No reply from backend within {}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// Broker or cache connection failure.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<PreprocessError> for DispatchError {
    fn from(e: PreprocessError) -> Self {
        DispatchError::InvalidInput(e.to_string())
    }
}

impl From<BrokerError> for DispatchError {
    fn from(e: BrokerError) -> Self {
        DispatchError::BackendUnavailable(e.to_string())
    }
}

impl From<CacheError> for DispatchError {
    fn from(e: CacheError) -> Self {
        DispatchError::BackendUnavailable(e.to_string())
    }
}

impl DispatchError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DispatchError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            DispatchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            DispatchError::InvalidInput(_) => "invalid_input",
            DispatchError::Timeout(_) => "timeout",
            DispatchError::BackendUnavailable(_) => "backend_unavailable",
            DispatchError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Prediction request failed");
        } else {
            tracing::debug!(error = %self, "Prediction request rejected");
        }

        let body = Json(json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string()
            }
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
