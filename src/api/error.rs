use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::ServiceError;

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        match self {
            ServiceError::Validation(errors) => {
                tracing::debug!(%errors, "request rejected");
                let body = Json(json!({ "detail": errors.errors() }));
                (StatusCode::UNPROCESSABLE_ENTITY, body).into_response()
            }
            ServiceError::Timeout { duration, .. } => {
                tracing::warn!(?duration, "generation timed out");
                let body = Json(json!({ "detail": "Generation timed out" }));
                (StatusCode::GATEWAY_TIMEOUT, body).into_response()
            }
            other => {
                tracing::error!(error = %other, "request failed");
                let body = Json(json!({ "detail": "Internal server error" }));
                (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
            }
        }
    }
}
