//! Repository contracts (§6 "External Interfaces — Durable store").
//!
//! The core never talks to a concrete storage engine directly; it depends on
//! these traits. `sqlite.rs` is the reference implementation that makes this
//! crate runnable standalone — a real deployment's storage engine plugs into
//! the same seam (§1 Non-goals: "persistent storage engine" is an external
//! collaborator).

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    CacheEntry, DownloadQueueItem, DownloadStatus, Indexer, IndexerHealth, SearchHistoryEntry,
    UserIndexerConfig,
};

/// Admin-managed indexer definitions. `name` is unique; deleting an indexer
/// cascades to its per-user config and health history (§3 Indexer lifecycle).
#[async_trait]
pub trait IndexerRepository: Send + Sync {
    async fn create(&self, indexer: &Indexer) -> Result<()>;
    async fn update(&self, indexer: &Indexer) -> Result<()>;
    async fn delete(&self, id: Uuid) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Indexer>>;
    async fn get_by_name(&self, name: &str) -> Result<Option<Indexer>>;
    async fn list(&self) -> Result<Vec<Indexer>>;
    async fn list_active(&self) -> Result<Vec<Indexer>>;
}

/// Per-user enablement and credentials. Unique on `(user_id, indexer_id)`.
#[async_trait]
pub trait UserIndexerConfigRepository: Send + Sync {
    async fn upsert(&self, config: &UserIndexerConfig) -> Result<()>;
    async fn get(&self, user_id: Uuid, indexer_id: Uuid) -> Result<Option<UserIndexerConfig>>;
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<UserIndexerConfig>>;
    async fn record_test_result(
        &self,
        user_id: Uuid,
        indexer_id: Uuid,
        success: bool,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Append-only health observations. The latest row per indexer is
/// authoritative (§3 IndexerHealth).
#[async_trait]
pub trait HealthRepository: Send + Sync {
    async fn record(&self, health: &IndexerHealth) -> Result<()>;
    async fn latest(&self, indexer_id: Uuid) -> Result<Option<IndexerHealth>>;
    async fn latest_all(&self) -> Result<Vec<IndexerHealth>>;
    async fn prune_older_than(&self, horizon: DateTime<Utc>) -> Result<u64>;
}

/// Filters accepted by `DownloadQueueRepository::list`.
#[derive(Debug, Clone, Default)]
pub struct QueueListFilter {
    pub user_id: Option<Uuid>,
    pub status: Option<DownloadStatus>,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Clone)]
pub struct QueuePage {
    pub items: Vec<DownloadQueueItem>,
    pub total: u64,
}

/// The download queue's persistent store (§4.H, §6).
#[async_trait]
pub trait DownloadQueueRepository: Send + Sync {
    async fn insert(&self, item: &DownloadQueueItem) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<DownloadQueueItem>>;
    async fn list(&self, filter: &QueueListFilter) -> Result<QueuePage>;

    /// Atomically select and claim the highest-priority pending item
    /// (priority DESC, created_at ASC, id ASC for stable ties), transitioning
    /// it to `Downloading` with `started_at` set. Returns `None` if no
    /// pending item exists system-wide.
    async fn select_next_pending(&self) -> Result<Option<DownloadQueueItem>>;

    async fn active_downloads(&self, user_id: Option<Uuid>) -> Result<Vec<DownloadQueueItem>>;

    /// Replace the full row. Callers are expected to have validated the
    /// transition against `crate::queue::state` first.
    async fn update(&self, item: &DownloadQueueItem) -> Result<()>;

    async fn update_progress(&self, id: Uuid, progress_percentage: u8) -> Result<()>;

    /// Finalize a terminal transition: persist the row and write the
    /// immutable history copy in one unit.
    async fn finalize(&self, item: &DownloadQueueItem) -> Result<()>;

    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// Search history, written best-effort per completed search (§3, §4.J).
#[async_trait]
pub trait SearchHistoryRepository: Send + Sync {
    async fn append(&self, entry: &SearchHistoryEntry) -> Result<()>;
    async fn recent_for_user(&self, user_id: Uuid, limit: u32) -> Result<Vec<SearchHistoryEntry>>;
    async fn prune_older_than(&self, horizon: DateTime<Utc>) -> Result<u64>;
}

/// Tier-2 (durable) search cache, keyed by request fingerprint (§4.G).
#[async_trait]
pub trait SearchCacheRepository: Send + Sync {
    async fn upsert(&self, entry: &CacheEntry) -> Result<()>;
    async fn get_if_fresh(&self, fingerprint: &str) -> Result<Option<CacheEntry>>;
    async fn prune_expired(&self) -> Result<u64>;
}

/// Bundles every repository trait behind a single handle the container
/// wires through the rest of the application (§9 "no module-level
/// singletons").
pub trait Repositories: Send + Sync {
    fn indexers(&self) -> &dyn IndexerRepository;
    fn user_indexer_configs(&self) -> &dyn UserIndexerConfigRepository;
    fn health(&self) -> &dyn HealthRepository;
    fn queue(&self) -> &dyn DownloadQueueRepository;
    fn search_history(&self) -> &dyn SearchHistoryRepository;
    fn search_cache(&self) -> &dyn SearchCacheRepository;
}

pub(crate) fn map_db_err(e: impl std::fmt::Display) -> Error {
    Error::Database(e.to_string())
}
