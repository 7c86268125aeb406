use std::sync::OnceLock;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}

static REQ_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static AD_IMPRESSIONS: OnceLock<IntCounter> = OnceLock::new();
static CACHE_LOOKUPS: OnceLock<IntCounterVec> = OnceLock::new();
static KEYWORDS_IMPORTED: OnceLock<IntCounter> = OnceLock::new();
static ACTIVE_STREAMS: OnceLock<IntGauge> = OnceLock::new();

/// Create and register the collectors. Safe to call more than once.
pub fn init_metrics() -> prometheus::Result<()> {
    if REQ_COUNTER.get().is_some() {
        return Ok(());
    }

    let req_counter = IntCounterVec::new(
        prometheus::opts!("requests_total", "Total requests per route"),
        &["route", "status"],
    )?;
    let impressions = IntCounter::new("ad_impressions_total", "Keyword links served in assistant messages")?;
    let lookups = IntCounterVec::new(
        prometheus::opts!("keyword_cache_lookups_total", "Keyword cache lookups by outcome"),
        &["outcome"],
    )?;
    let imported = IntCounter::new("keywords_imported_total", "Keywords inserted by bulk import")?;
    let streams = IntGauge::new("active_streams", "Chat completions currently streaming")?;

    REGISTRY.register(Box::new(req_counter.clone())).ok();
    REGISTRY.register(Box::new(impressions.clone())).ok();
    REGISTRY.register(Box::new(lookups.clone())).ok();
    REGISTRY.register(Box::new(imported.clone())).ok();
    REGISTRY.register(Box::new(streams.clone())).ok();

    let _ = REQ_COUNTER.set(req_counter);
    let _ = AD_IMPRESSIONS.set(impressions);
    let _ = CACHE_LOOKUPS.set(lookups);
    let _ = KEYWORDS_IMPORTED.set(imported);
    let _ = ACTIVE_STREAMS.set(streams);
    Ok(())
}

pub fn inc_request(route: &str, status: &str) {
    if let Some(counter) = REQ_COUNTER.get() {
        counter.with_label_values(&[route, status]).inc();
    }
}

/// `status` label for `requests_total`: `ok`, `rejected` (4xx) or `error` (5xx).
pub fn outcome_label(status: StatusCode) -> &'static str {
    if status.is_server_error() {
        "error"
    } else if status.is_client_error() {
        "rejected"
    } else {
        "ok"
    }
}

pub fn inc_ad_impressions(count: u64) {
    if let Some(counter) = AD_IMPRESSIONS.get() {
        counter.inc_by(count);
    }
}

pub fn inc_cache_lookup(outcome: &str) {
    if let Some(counter) = CACHE_LOOKUPS.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn inc_imported_keywords(count: u64) {
    if let Some(counter) = KEYWORDS_IMPORTED.get() {
        counter.inc_by(count);
    }
}

pub fn inc_streams() {
    if let Some(gauge) = ACTIVE_STREAMS.get() {
        gauge.inc();
    }
}

pub fn dec_streams() {
    if let Some(gauge) = ACTIVE_STREAMS.get() {
        gauge.dec();
    }
}

/// Keeps `active_streams` raised for as long as it lives.
pub struct StreamGuard;

impl StreamGuard {
    pub fn new() -> Self {
        inc_streams();
        StreamGuard
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        dec_streams();
    }
}

pub async fn get_metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; version=0.0.4")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
}
