//! Indexer admin endpoints (§6): CRUD over `IndexerRepository` plus an
//! explicit connectivity test against the live adapter.

use axum::extract::{Path, State};
use axum::Json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Indexer, IndexerTestResult};
use crate::repository::IndexerRepository;
use crate::server::AppState;

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Indexer>>> {
    Ok(Json(state.repos.list().await?))
}

pub async fn create(
    State(state): State<AppState>,
    Json(indexer): Json<Indexer>,
) -> Result<Json<Indexer>> {
    indexer.validate().map_err(Error::InvalidArgument)?;
    state.repos.create(&indexer).await?;
    Ok(Json(indexer))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(mut indexer): Json<Indexer>,
) -> Result<Json<Indexer>> {
    indexer.id = id;
    indexer.validate().map_err(Error::InvalidArgument)?;
    state.repos.update(&indexer).await?;
    Ok(Json(indexer))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::http::StatusCode> {
    state.repos.delete(id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// Exercises the live adapter registered for `id` rather than the durable
/// row alone, so a test reflects what the search path will actually see.
pub async fn test(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<IndexerTestResult>> {
    let adapter = state
        .registry
        .get(id)
        .ok_or_else(|| Error::NotFound(format!("no live adapter registered for {id}")))?;
    let cancel = CancellationToken::new();
    let result = adapter.test_connection(&cancel).await;

    state
        .health
        .record(
            id,
            if result.success {
                crate::models::HealthStatus::Healthy
            } else {
                crate::models::HealthStatus::Down
            },
            Some(result.response_time_ms),
            result.error.clone(),
        )
        .await?;

    Ok(Json(result))
}
