use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use marketsync_common::error::MarketsyncError;

pub struct ApiError(pub MarketsyncError);

impl From<MarketsyncError> for ApiError {
    fn from(err: MarketsyncError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            MarketsyncError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            MarketsyncError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            MarketsyncError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            other => {
                tracing::error!(error = %other, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
