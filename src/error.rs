use axum::http::StatusCode;
use axum::response::{ IntoResponse, Response };
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Every failure a route can report before its response body starts.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// Misconfiguration detected before any upstream call.
    #[error("{0}")]
    Config(String),

    /// The upstream answered with a failure, or could not be reached.
    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Config(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Plain-text rendering of an [`ApiError`], used by the widget routes.
#[derive(Debug)]
pub struct TextError(pub ApiError);

impl From<ApiError> for TextError {
    fn from(err: ApiError) -> Self {
        TextError(err)
    }
}

impl IntoResponse for TextError {
    fn into_response(self) -> Response {
        (self.0.status(), self.0.to_string()).into_response()
    }
}
