//! HTTP handlers for the chat UI and the admin dashboard

pub mod admin_api;
pub mod analytics_api;
pub mod chat_api;
pub mod keyword_api;
pub mod process_api;
pub mod upload_api;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::shared_state::AppState;
use crate::store::{Database, KeywordError};

pub use admin_api::{cache_status, clear_cache, health, service_status};
pub use analytics_api::{get_analytics, track_click, track_impression};
pub use chat_api::chat;
pub use keyword_api::{create_keyword, delete_keyword, list_keywords, toggle_keyword, update_keyword};
pub use process_api::process_messages;
pub use upload_api::upload_keywords;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error returned by handlers, rendered as `{"error": ...}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

impl From<KeywordError> for ApiError {
    fn from(e: KeywordError) -> Self {
        match e {
            KeywordError::Validation(msg) => Self::bad_request(msg),
            KeywordError::Duplicate(_) => Self::new(StatusCode::CONFLICT, e.to_string()),
            KeywordError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, e.to_string()),
            KeywordError::Database(_) | KeywordError::Pool(_) => {
                error!("Keyword storage failure: {}", e);
                Self::internal("Database error")
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        error!("Request failed: {:#}", e);
        Self::internal(e.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Run a synchronous database call on the blocking pool.
pub(crate) async fn blocking_db<T, E, F>(state: &AppState, call: F) -> ApiResult<T>
where
    F: FnOnce(&Database) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    let database = state.database.clone();
    tokio::task::spawn_blocking(move || call(&database))
        .await
        .map_err(|e| ApiError::internal(format!("Database task failed: {}", e)))?
        .map_err(Into::into)
}
