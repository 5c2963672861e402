//! HTTP error mapping for the management API.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::error::FabricError;

/// Wraps a [`FabricError`] so handlers can return it with `?`.
#[derive(Debug)]
pub struct ApiError(pub FabricError);

impl From<FabricError> for ApiError {
    fn from(err: FabricError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            FabricError::NotFound(_) => StatusCode::NOT_FOUND,
            FabricError::Parse(_) => StatusCode::BAD_REQUEST,
            FabricError::ServiceUnavailable { .. } | FabricError::Closed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            FabricError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            FabricError::Network(_) | FabricError::Status(_) => StatusCode::BAD_GATEWAY,
            FabricError::Bind { .. } | FabricError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, kind = self.0.kind(), "API request failed");
        }
        let payload = json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
        });
        (status, Json(payload)).into_response()
    }
}
