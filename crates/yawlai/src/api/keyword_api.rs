//! Admin endpoints for keyword records

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::api::{blocking_db, ApiError, ApiResult};
use crate::shared_state::AppState;
use crate::store::{Keyword, KeywordUpdate};

#[derive(Debug, Serialize)]
pub struct KeywordsResponse {
    pub keywords: Vec<Keyword>,
    pub total: usize,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateKeywordRequest {
    #[validate(length(min = 1, max = 100))]
    pub keyword: String,
    #[validate(url)]
    pub target_url: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateKeywordRequest {
    #[validate(length(min = 1, max = 100))]
    pub keyword: Option<String>,
    #[validate(url)]
    pub target_url: Option<String>,
    pub active: Option<bool>,
}

fn validation_error(e: validator::ValidationErrors) -> ApiError {
    ApiError::bad_request(format!("Validation error: {}", e))
}

pub async fn list_keywords(State(state): State<AppState>) -> ApiResult<Json<KeywordsResponse>> {
    let keywords = blocking_db(&state, |db| db.keywords.list_keywords()).await?;
    Ok(Json(KeywordsResponse { total: keywords.len(), keywords }))
}

pub async fn create_keyword(
    State(state): State<AppState>,
    Json(req): Json<CreateKeywordRequest>,
) -> ApiResult<(StatusCode, Json<Keyword>)> {
    req.validate().map_err(validation_error)?;
    let keyword = blocking_db(&state, move |db| {
        db.keywords.create_keyword(&req.keyword, &req.target_url, req.active)
    })
    .await?;
    state.keyword_cache.clear();
    Ok((StatusCode::CREATED, Json(keyword)))
}

pub async fn update_keyword(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateKeywordRequest>,
) -> ApiResult<Json<Keyword>> {
    req.validate().map_err(validation_error)?;
    let update = KeywordUpdate {
        keyword: req.keyword,
        target_url: req.target_url,
        active: req.active,
    };
    let keyword = blocking_db(&state, move |db| db.keywords.update_keyword(id, update)).await?;
    state.keyword_cache.clear();
    Ok(Json(keyword))
}

pub async fn toggle_keyword(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Keyword>> {
    let keyword = blocking_db(&state, move |db| db.keywords.toggle_keyword(id)).await?;
    info!("Keyword {} is now {}", id, if keyword.active { "active" } else { "inactive" });
    state.keyword_cache.clear();
    Ok(Json(keyword))
}

pub async fn delete_keyword(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    blocking_db(&state, move |db| db.keywords.delete_keyword(id)).await?;
    state.keyword_cache.clear();
    Ok(StatusCode::NO_CONTENT)
}
