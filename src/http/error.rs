use crate::errors::AppError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// `AppError` rendered as `{"error": <kind>, "message": <message>}`.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(value: AppError) -> Self {
        Self(value)
    }
}

pub fn status_for(error: &AppError) -> StatusCode {
    match error {
        AppError::NotAuthenticated(_) | AppError::Refresh(_) => StatusCode::UNAUTHORIZED,
        AppError::NotProvisioned(_) => StatusCode::CONFLICT,
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::Invalid(_) => StatusCode::BAD_REQUEST,
        AppError::AuthExchange(_) | AppError::Provision(_) | AppError::SyncWrite(_) => StatusCode::BAD_GATEWAY,
        AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        AppError::Io(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let message = match &self.0 {
            AppError::Io(_) | AppError::Internal(_) => {
                tracing::error!(error = %self.0, "request failed");
                "internal error".to_string()
            }
            other => other.message().to_string(),
        };
        (status, Json(json!({ "error": self.0.kind(), "message": message }))).into_response()
    }
}

pub fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Unauthorized", "message": "missing or invalid cron secret" })),
    )
        .into_response()
}
