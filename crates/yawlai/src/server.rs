//! HTTP server startup and routing.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, MatchedPath, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api;
use crate::config::Config;
use crate::metrics;
use crate::shared_state::AppState;
use crate::store::Database;

/// Open the database, warm the keyword cache and serve until shutdown.
pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    metrics::init_metrics()?;
    cfg.print_config();

    let database = Arc::new(Database::new(&cfg.database_path)?);
    let addr = cfg.api_addr()?;
    let state = AppState::new(cfg, database)?;

    let warmed = state.keyword_cache.get_active_keywords().await;
    info!("Keyword cache warmed with {} active keywords", warmed.len());

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Count every routed request, in the status counters and in `requests_total`
/// labelled by route template.
async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    state.counters.inc_total_requests();

    let response = next.run(request).await;
    metrics::inc_request(&route, metrics::outcome_label(response.status()));
    response
}

pub fn build_router(state: AppState) -> Router {
    use axum::http::Method;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let timeout = state.config.request_timeout();
    let body_limit = state.config.max_upload_bytes;

    let admin = Router::new()
        .route("/keywords", get(api::list_keywords).post(api::create_keyword))
        .route("/keywords/upload", post(api::upload_keywords))
        .route("/keywords/:id", put(api::update_keyword).delete(api::delete_keyword))
        .route("/keywords/:id/toggle", post(api::toggle_keyword))
        .route("/analytics", get(api::get_analytics))
        .route("/cache", get(api::cache_status))
        .route("/cache/clear", post(api::clear_cache))
        .route("/status", get(api::service_status));

    Router::new()
        .route("/api/chat", post(api::chat))
        .route("/api/process", post(api::process_messages))
        .route("/api/track/impression", post(api::track_impression))
        .route("/api/track/click", post(api::track_click))
        .nest("/api/admin", admin)
        .route("/healthz", get(api::health))
        .route("/metrics", get(metrics::get_metrics))
        .route_layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
}
