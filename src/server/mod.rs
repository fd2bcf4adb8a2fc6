//! HTTP API surface (§6) — `axum` router, already the donor's web framework,
//! wired through a shared `AppState`. Routes are split by resource the way
//! the donor split `api_indexers`/`api_info`/`api_native`/`api_settings`.

mod routes_downloads;
mod routes_indexers;
mod routes_search;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cache::CacheManager;
use crate::events::EventPublisher;
use crate::health::HealthMonitor;
use crate::indexer::IndexerRegistry;
use crate::metrics::MetricsRegistry;
use crate::queue::QueueScheduler;
use crate::repository::sqlite::SqliteRepositories;
use crate::search::SearchAggregator;

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<SearchAggregator>,
    pub scheduler: Arc<QueueScheduler>,
    pub registry: Arc<IndexerRegistry>,
    pub repos: Arc<SqliteRepositories>,
    pub events: Arc<EventPublisher>,
    pub health: Arc<HealthMonitor>,
    pub cache: Arc<CacheManager>,
    pub metrics: Arc<MetricsRegistry>,
    pub auth_shared_secret: Arc<Option<String>>,
}

pub fn router(state: AppState) -> Router {
    let auth_secret = state.auth_shared_secret.clone();

    Router::new()
        .route("/api/v1/search", get(routes_search::search))
        .route(
            "/api/v1/search/suggestions",
            get(routes_search::suggestions),
        )
        .route(
            "/api/v1/downloads/queue",
            get(routes_downloads::list_queue),
        )
        .route("/api/v1/downloads", post(routes_downloads::enqueue))
        .route(
            "/api/v1/downloads/queue/{id}",
            patch(routes_downloads::update_item),
        )
        .route(
            "/api/v1/downloads/queue/batch",
            post(routes_downloads::batch),
        )
        .route(
            "/api/v1/downloads/queue/{id}/retry",
            post(routes_downloads::retry),
        )
        .route(
            "/api/v1/downloads/queue/{id}/verify",
            post(routes_downloads::verify),
        )
        .route(
            "/api/v1/indexers",
            get(routes_indexers::list).post(routes_indexers::create),
        )
        .route(
            "/api/v1/indexers/{id}",
            axum::routing::put(routes_indexers::update).delete(routes_indexers::delete),
        )
        .route("/api/v1/indexers/{id}/test", post(routes_indexers::test))
        .route("/api/v1/events", get(ws::events))
        .with_state(state)
        .layer(middleware::from_fn_with_state(auth_secret, require_bearer_token))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Shared-secret bearer auth (§6 "auth (shared secret, token ttl)"). A
/// deployment with no secret configured runs open — suitable for a
/// single-user install behind its own reverse proxy, not a public one.
async fn require_bearer_token(
    axum::extract::State(secret): axum::extract::State<Arc<Option<String>>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = secret.as_ref() else {
        return Ok(next.run(request).await);
    };
    if expected.is_empty() {
        return Ok(next.run(request).await);
    }
    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if provided == Some(expected.as_str()) {
        Ok(next.run(request).await)
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

/// Runs the HTTP server until a shutdown signal arrives, then gives
/// in-flight requests `grace_period` to finish.
pub async fn serve(
    state: AppState,
    host: &str,
    port: u16,
    grace_period: Duration,
) -> anyhow::Result<()> {
    let app = router(state);
    let addr = format!("{host}:{port}");
    tracing::info!(%addr, "foliofox listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(grace_period))
        .await?;
    Ok(())
}

async fn shutdown_signal(grace_period: Duration) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
    tokio::time::sleep(grace_period).await;
}
