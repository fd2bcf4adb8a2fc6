//! Download queue endpoints (§6): list/enqueue/update/batch/retry/verify.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{BookFormat, DownloadQueueItem, DownloadStatus};
use crate::queue::scheduler::{BatchAction, VerifyOutcome};
use crate::queue::state;
use crate::repository::{DownloadQueueRepository, QueueListFilter, QueuePage};
use crate::server::AppState;

fn current_user_id(headers: &axum::http::HeaderMap) -> Uuid {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .unwrap_or_else(Uuid::nil)
}

#[derive(Debug, Deserialize)]
pub struct ListQueueParams {
    #[serde(default)]
    pub status: Option<DownloadStatus>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
    /// When set, lists across every user rather than just the caller's own
    /// queue (an admin view; no separate role system exists yet to gate it).
    #[serde(default)]
    pub all_users: bool,
}

#[derive(Debug, Serialize)]
pub struct QueueListResponse {
    pub downloads: Vec<DownloadQueueItem>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

pub async fn list_queue(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Query(params): Query<ListQueueParams>,
) -> Result<Json<QueueListResponse>> {
    let user_id = current_user_id(&headers);
    let page = params.page.unwrap_or(1).max(1);
    let per_page = params.per_page.unwrap_or(50).clamp(1, 200);
    let filter = QueueListFilter {
        user_id: if params.all_users { None } else { Some(user_id) },
        status: params.status,
        page,
        per_page,
    };
    let QueuePage { items, total } = state.repos.list(&filter).await?;
    Ok(Json(QueueListResponse {
        downloads: items,
        page,
        per_page,
        total,
    }))
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub indexer_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    pub download_url: String,
    pub file_format: BookFormat,
    #[serde(default)]
    pub file_size_bytes: Option<u64>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub quality_profile_id: Option<Uuid>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_priority() -> i32 {
    50
}

fn default_max_retries() -> u32 {
    3
}

pub async fn enqueue(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(request): Json<EnqueueRequest>,
) -> Result<Json<DownloadQueueItem>> {
    let user_id = current_user_id(&headers);
    let mut item = DownloadQueueItem::new(
        user_id,
        request.indexer_id,
        request.title,
        request.download_url,
        request.file_format,
        request.priority,
        request.max_retries,
    );
    item.author = request.author;
    item.file_size_bytes = request.file_size_bytes;
    item.quality_profile_id = request.quality_profile_id;
    item.checksum = request.checksum;
    let item = state.scheduler.enqueue(item).await?;
    Ok(Json(item))
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub status: Option<DownloadStatus>,
}

pub async fn update_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateItemRequest>,
) -> Result<Json<DownloadQueueItem>> {
    let mut item = state
        .repos
        .get(id)
        .await?
        .ok_or_else(|| Error::NotFound(id.to_string()))?;

    if let Some(status) = request.status {
        state::validate_batch_target(&item, status)?;
        item.status = status;
    }
    if let Some(priority) = request.priority {
        item.priority = priority.clamp(1, 100);
    }
    item.updated_at = chrono::Utc::now();
    state.repos.update(&item).await?;
    Ok(Json(item))
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub action: BatchActionParam,
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchActionParam {
    Pause,
    Resume,
    Cancel,
    Delete,
    Retry,
}

impl From<BatchActionParam> for BatchAction {
    fn from(param: BatchActionParam) -> Self {
        match param {
            BatchActionParam::Pause => BatchAction::Pause,
            BatchActionParam::Resume => BatchAction::Resume,
            BatchActionParam::Cancel => BatchAction::Cancel,
            BatchActionParam::Delete => BatchAction::Delete,
            BatchActionParam::Retry => BatchAction::Retry,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub affected: u64,
    pub errors: Vec<BatchError>,
}

#[derive(Debug, Serialize)]
pub struct BatchError {
    pub id: Uuid,
    pub error: String,
}

pub async fn batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchResponse>> {
    let outcome = state
        .scheduler
        .batch(request.action.into(), &request.ids)
        .await?;
    Ok(Json(BatchResponse {
        affected: outcome.affected,
        errors: outcome
            .errors
            .into_iter()
            .map(|(id, error)| BatchError { id, error })
            .collect(),
    }))
}

/// Manual retry, distinct from the scheduler's automatic backoff retries:
/// resets the retry budget and clears the error, so an operator can force
/// another attempt on an item that has exhausted it (§4.H, §7).
pub async fn retry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DownloadQueueItem>> {
    state.scheduler.batch(BatchAction::Retry, &[id]).await?;
    let item = state
        .repos
        .get(id)
        .await?
        .ok_or_else(|| Error::NotFound(id.to_string()))?;
    Ok(Json(item))
}

pub async fn verify(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<VerifyOutcomeResponse>> {
    let outcome = state.scheduler.verify(id).await?;
    Ok(Json(outcome.into()))
}

#[derive(Debug, Serialize)]
pub struct VerifyOutcomeResponse {
    pub verified: bool,
    pub checksum: Option<String>,
    pub error: Option<String>,
}

impl From<VerifyOutcome> for VerifyOutcomeResponse {
    fn from(outcome: VerifyOutcome) -> Self {
        Self {
            verified: outcome.verified,
            checksum: outcome.checksum,
            error: outcome.error,
        }
    }
}
