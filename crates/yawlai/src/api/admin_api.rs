use axum::extract::State;
use axum::Json;
use serde::Serialize;
use sysinfo::System;

use crate::ads::CacheStatus;
use crate::api::{blocking_db, ApiResult};
use crate::shared_state::{AppState, CounterSnapshot};
use crate::store::DatabaseStats;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_seconds: u64,
    pub model: String,
    pub llm_configured: bool,
    pub memory_usage: String,
    pub process_memory_bytes: Option<u64>,
    pub database: DatabaseStats,
    pub keyword_cache: CacheStatus,
    pub counters: CounterSnapshot,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
    })
}

pub async fn service_status(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    let mut sys = System::new();
    sys.refresh_memory();
    let memory_usage = format!(
        "{}/{} MB",
        sys.used_memory() / 1024 / 1024,
        sys.total_memory() / 1024 / 1024
    );
    let process_memory_bytes = sysinfo::get_current_pid().ok().and_then(|pid| {
        sys.refresh_process(pid);
        sys.process(pid).map(|p| p.memory())
    });

    let response = StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        model: state.completion.model().to_string(),
        llm_configured: state.config.llm_api_key.is_some(),
        memory_usage,
        process_memory_bytes,
        database: blocking_db(&state, |db| db.get_stats()).await?,
        keyword_cache: state.keyword_cache.status(),
        counters: state.counters.snapshot(),
    };
    Ok(Json(response))
}

pub async fn cache_status(State(state): State<AppState>) -> Json<CacheStatus> {
    Json(state.keyword_cache.status())
}

/// Drop the cached keywords; the next chat turn reloads them.
pub async fn clear_cache(State(state): State<AppState>) -> Json<CacheStatus> {
    state.keyword_cache.clear();
    Json(state.keyword_cache.status())
}
