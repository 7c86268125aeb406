//! Analytics reporting and client-side tracking beacons

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::{blocking_db, ApiError, ApiResult};
use crate::shared_state::AppState;
use crate::store::{AnalyticsTotals, DailySummary, KeywordStats};

const MAX_DAYS: u32 = 365;

#[derive(Debug, Deserialize)]
pub struct AnalyticsParams {
    #[serde(default = "default_days")]
    pub days: u32,
}

fn default_days() -> u32 {
    30
}

#[derive(Debug, Serialize)]
pub struct AnalyticsResponse {
    pub days: u32,
    pub totals: AnalyticsTotals,
    pub daily: Vec<DailySummary>,
    pub keywords: Vec<KeywordStats>,
}

pub async fn get_analytics(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsParams>,
) -> ApiResult<Json<AnalyticsResponse>> {
    if params.days == 0 || params.days > MAX_DAYS {
        return Err(ApiError::bad_request(format!("days must be between 1 and {}", MAX_DAYS)));
    }
    let days = params.days;
    let report = blocking_db(&state, move |db| -> anyhow::Result<AnalyticsResponse> {
        Ok(AnalyticsResponse {
            days,
            totals: db.analytics.totals()?,
            daily: db.analytics.daily_summary(days)?,
            keywords: db.analytics.keyword_stats(days)?,
        })
    })
    .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    pub session_id: String,
    pub keyword_id: Option<i64>,
    pub keyword: String,
}

impl TrackRequest {
    fn check(&self) -> Result<(), ApiError> {
        if self.session_id.trim().is_empty() || self.keyword.trim().is_empty() {
            return Err(ApiError::bad_request("session_id and keyword are required"));
        }
        Ok(())
    }
}

/// Tracking is fire-and-forget: the beacon is acknowledged before the write lands.
pub async fn track_impression(
    State(state): State<AppState>,
    Json(req): Json<TrackRequest>,
) -> ApiResult<StatusCode> {
    req.check()?;
    state.record_in_background("impression", move |db| {
        db.analytics.record_impression(&req.session_id, req.keyword_id, &req.keyword)
    });
    Ok(StatusCode::ACCEPTED)
}

pub async fn track_click(
    State(state): State<AppState>,
    Json(req): Json<TrackRequest>,
) -> ApiResult<StatusCode> {
    req.check()?;
    state.record_in_background("click", move |db| {
        db.analytics.record_click(&req.session_id, req.keyword_id, &req.keyword)
    });
    Ok(StatusCode::ACCEPTED)
}
