//! SQLite-backed reference implementation of the repository traits.
//!
//! Uses the same `rusqlite` + `r2d2` + `r2d2_sqlite` stack the donor codebase
//! already depended on for its own search cache/log tables. Every call hops
//! onto `spawn_blocking` since `rusqlite` is synchronous — long transactions
//! are forbidden (§5), so each method holds a connection only for the
//! duration of one statement (or, for the queue head transition, one short
//! `IMMEDIATE` transaction).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{
    map_db_err, DownloadQueueRepository, HealthRepository, IndexerRepository, QueueListFilter,
    QueuePage, Repositories, SearchCacheRepository, SearchHistoryRepository,
    UserIndexerConfigRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    BookFormat, CacheEntry, DownloadHistoryItem, DownloadQueueItem, DownloadStatus, HealthStatus,
    Indexer, IndexerHealth, IndexerKind, SearchHistoryEntry, SearchResponse, UserIndexerConfig,
};

pub type Pooled = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct SqliteRepositories {
    pool: Pooled,
}

impl SqliteRepositories {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::new(manager).map_err(map_db_err)?;
        let conn = pool.get().map_err(map_db_err)?;
        init_schema(&conn)?;
        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(map_db_err)?;
        let conn = pool.get().map_err(map_db_err)?;
        init_schema(&conn)?;
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(map_db_err)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS indexers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            base_url TEXT NOT NULL,
            api_path TEXT,
            kind TEXT NOT NULL,
            supports_search INTEGER NOT NULL,
            supports_download INTEGER NOT NULL,
            priority INTEGER NOT NULL,
            rate_limit_requests INTEGER NOT NULL,
            rate_limit_window_secs INTEGER NOT NULL,
            timeout_secs INTEGER NOT NULL,
            is_active INTEGER NOT NULL,
            user_agent TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS user_indexer_configs (
            user_id TEXT NOT NULL,
            indexer_id TEXT NOT NULL,
            is_enabled INTEGER NOT NULL,
            api_key TEXT,
            username TEXT,
            password TEXT,
            last_test_at TEXT,
            last_test_success INTEGER,
            PRIMARY KEY (user_id, indexer_id)
        );

        CREATE TABLE IF NOT EXISTS indexer_health (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            indexer_id TEXT NOT NULL,
            status TEXT NOT NULL,
            response_time_ms INTEGER,
            error_message TEXT,
            checked_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_health_indexer_checked
            ON indexer_health(indexer_id, checked_at DESC);

        CREATE TABLE IF NOT EXISTS download_queue (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            book_id TEXT,
            indexer_id TEXT NOT NULL,
            title TEXT NOT NULL,
            author TEXT,
            download_url TEXT NOT NULL,
            file_format TEXT NOT NULL,
            file_size_bytes INTEGER,
            priority INTEGER NOT NULL,
            status TEXT NOT NULL,
            progress_percentage INTEGER NOT NULL,
            download_path TEXT,
            quality_profile_id TEXT,
            retry_count INTEGER NOT NULL,
            max_retries INTEGER NOT NULL,
            error_message TEXT,
            checksum TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            estimated_completion TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_queue_status_priority
            ON download_queue(status, priority DESC, created_at ASC);

        CREATE TABLE IF NOT EXISTS download_history (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            indexer_id TEXT NOT NULL,
            title TEXT NOT NULL,
            file_format TEXT NOT NULL,
            final_status TEXT NOT NULL,
            retry_count INTEGER NOT NULL,
            error_message TEXT,
            created_at TEXT NOT NULL,
            completed_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS search_history (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            query TEXT NOT NULL,
            filters TEXT NOT NULL,
            results_count INTEGER NOT NULL,
            indexers_searched TEXT NOT NULL,
            search_duration_ms INTEGER NOT NULL,
            searched_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_search_history_user
            ON search_history(user_id, searched_at DESC);

        CREATE TABLE IF NOT EXISTS search_cache (
            fingerprint TEXT PRIMARY KEY,
            response TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            hit_count INTEGER NOT NULL,
            size_estimate INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_search_cache_expires ON search_cache(expires_at);
        ",
    )
    .map_err(map_db_err)?;
    Ok(())
}

fn row_to_indexer(row: &rusqlite::Row) -> rusqlite::Result<Indexer> {
    let kind: String = row.get("kind")?;
    Ok(Indexer {
        id: parse_uuid(row.get::<_, String>("id")?),
        name: row.get("name")?,
        base_url: row.get("base_url")?,
        api_path: row.get("api_path")?,
        kind: parse_kind(&kind),
        supports_search: row.get("supports_search")?,
        supports_download: row.get("supports_download")?,
        priority: row.get("priority")?,
        rate_limit_requests: row.get("rate_limit_requests")?,
        rate_limit_window_secs: row.get("rate_limit_window_secs")?,
        timeout_secs: row.get("timeout_secs")?,
        is_active: row.get("is_active")?,
        user_agent: row.get("user_agent")?,
    })
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_default()
}

fn parse_kind(s: &str) -> IndexerKind {
    match s {
        "torznab" => IndexerKind::Torznab,
        "newznab" => IndexerKind::Newznab,
        "rss" => IndexerKind::Rss,
        "html" => IndexerKind::Html,
        _ => IndexerKind::Api,
    }
}

fn parse_status(s: &str) -> DownloadStatus {
    match s {
        "downloading" => DownloadStatus::Downloading,
        "completed" => DownloadStatus::Completed,
        "failed" => DownloadStatus::Failed,
        "cancelled" => DownloadStatus::Cancelled,
        "paused" => DownloadStatus::Paused,
        _ => DownloadStatus::Pending,
    }
}

fn parse_health_status(s: &str) -> HealthStatus {
    match s {
        "degraded" => HealthStatus::Degraded,
        "down" => HealthStatus::Down,
        "maintenance" => HealthStatus::Maintenance,
        _ => HealthStatus::Healthy,
    }
}

fn row_to_queue_item(row: &rusqlite::Row) -> rusqlite::Result<DownloadQueueItem> {
    let format: String = row.get("file_format")?;
    let status: String = row.get("status")?;
    Ok(DownloadQueueItem {
        id: parse_uuid(row.get::<_, String>("id")?),
        user_id: parse_uuid(row.get::<_, String>("user_id")?),
        book_id: row
            .get::<_, Option<String>>("book_id")?
            .map(parse_uuid),
        indexer_id: parse_uuid(row.get::<_, String>("indexer_id")?),
        title: row.get("title")?,
        author: row.get("author")?,
        download_url: row.get("download_url")?,
        file_format: format_from_str(&format),
        file_size_bytes: row.get::<_, Option<i64>>("file_size_bytes")?.map(|v| v as u64),
        priority: row.get("priority")?,
        status: parse_status(&status),
        progress_percentage: row.get::<_, i64>("progress_percentage")? as u8,
        download_path: row.get("download_path")?,
        quality_profile_id: row
            .get::<_, Option<String>>("quality_profile_id")?
            .map(parse_uuid),
        retry_count: row.get::<_, i64>("retry_count")? as u32,
        max_retries: row.get::<_, i64>("max_retries")? as u32,
        error_message: row.get("error_message")?,
        checksum: row.get("checksum")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        estimated_completion: row.get("estimated_completion")?,
    })
}

fn format_from_str(s: &str) -> BookFormat {
    BookFormat::from_token(s).unwrap_or(BookFormat::Unknown)
}

#[async_trait]
impl IndexerRepository for SqliteRepositories {
    async fn create(&self, indexer: &Indexer) -> Result<()> {
        let pool = self.pool.clone();
        let indexer = indexer.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            conn.execute(
                "INSERT INTO indexers (id, name, base_url, api_path, kind, supports_search,
                    supports_download, priority, rate_limit_requests, rate_limit_window_secs,
                    timeout_secs, is_active, user_agent)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
                params![
                    indexer.id.to_string(),
                    indexer.name,
                    indexer.base_url,
                    indexer.api_path,
                    indexer.kind.to_string(),
                    indexer.supports_search,
                    indexer.supports_download,
                    indexer.priority,
                    indexer.rate_limit_requests,
                    indexer.rate_limit_window_secs,
                    indexer.timeout_secs,
                    indexer.is_active,
                    indexer.user_agent,
                ],
            )
            .map_err(|e| {
                if e.to_string().contains("UNIQUE") {
                    Error::Conflict(format!("indexer name '{}' already exists", indexer.name))
                } else {
                    map_db_err(e)
                }
            })?;
            Ok(())
        })
        .await
        .map_err(map_db_err)?
    }

    async fn update(&self, indexer: &Indexer) -> Result<()> {
        let pool = self.pool.clone();
        let indexer = indexer.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            let affected = conn
                .execute(
                    "UPDATE indexers SET name=?2, base_url=?3, api_path=?4, kind=?5,
                        supports_search=?6, supports_download=?7, priority=?8,
                        rate_limit_requests=?9, rate_limit_window_secs=?10, timeout_secs=?11,
                        is_active=?12, user_agent=?13 WHERE id=?1",
                    params![
                        indexer.id.to_string(),
                        indexer.name,
                        indexer.base_url,
                        indexer.api_path,
                        indexer.kind.to_string(),
                        indexer.supports_search,
                        indexer.supports_download,
                        indexer.priority,
                        indexer.rate_limit_requests,
                        indexer.rate_limit_window_secs,
                        indexer.timeout_secs,
                        indexer.is_active,
                        indexer.user_agent,
                    ],
                )
                .map_err(map_db_err)?;
            if affected == 0 {
                return Err(Error::NotFound(format!("indexer {}", indexer.id)));
            }
            Ok(())
        })
        .await
        .map_err(map_db_err)?
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            conn.execute(
                "DELETE FROM user_indexer_configs WHERE indexer_id=?1",
                params![id.to_string()],
            )
            .map_err(map_db_err)?;
            conn.execute(
                "DELETE FROM indexer_health WHERE indexer_id=?1",
                params![id.to_string()],
            )
            .map_err(map_db_err)?;
            conn.execute("DELETE FROM indexers WHERE id=?1", params![id.to_string()])
                .map_err(map_db_err)?;
            Ok(())
        })
        .await
        .map_err(map_db_err)?
    }

    async fn get(&self, id: Uuid) -> Result<Option<Indexer>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            conn.query_row(
                "SELECT * FROM indexers WHERE id=?1",
                params![id.to_string()],
                row_to_indexer,
            )
            .optional()
            .map_err(map_db_err)
        })
        .await
        .map_err(map_db_err)?
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Indexer>> {
        let pool = self.pool.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            conn.query_row(
                "SELECT * FROM indexers WHERE name=?1",
                params![name],
                row_to_indexer,
            )
            .optional()
            .map_err(map_db_err)
        })
        .await
        .map_err(map_db_err)?
    }

    async fn list(&self) -> Result<Vec<Indexer>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            let mut stmt = conn
                .prepare("SELECT * FROM indexers ORDER BY priority DESC, name ASC")
                .map_err(map_db_err)?;
            let rows = stmt
                .query_map([], row_to_indexer)
                .map_err(map_db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_db_err)?;
            Ok(rows)
        })
        .await
        .map_err(map_db_err)?
    }

    async fn list_active(&self) -> Result<Vec<Indexer>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            let mut stmt = conn
                .prepare("SELECT * FROM indexers WHERE is_active=1 ORDER BY priority DESC")
                .map_err(map_db_err)?;
            let rows = stmt
                .query_map([], row_to_indexer)
                .map_err(map_db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_db_err)?;
            Ok(rows)
        })
        .await
        .map_err(map_db_err)?
    }
}

#[async_trait]
impl UserIndexerConfigRepository for SqliteRepositories {
    async fn upsert(&self, config: &UserIndexerConfig) -> Result<()> {
        let pool = self.pool.clone();
        let config = config.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            conn.execute(
                "INSERT INTO user_indexer_configs
                    (user_id, indexer_id, is_enabled, api_key, username, password,
                     last_test_at, last_test_success)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8)
                 ON CONFLICT(user_id, indexer_id) DO UPDATE SET
                    is_enabled=excluded.is_enabled, api_key=excluded.api_key,
                    username=excluded.username, password=excluded.password,
                    last_test_at=excluded.last_test_at,
                    last_test_success=excluded.last_test_success",
                params![
                    config.user_id.to_string(),
                    config.indexer_id.to_string(),
                    config.is_enabled,
                    config.api_key,
                    config.username,
                    config.password,
                    config.last_test_at,
                    config.last_test_success,
                ],
            )
            .map_err(map_db_err)?;
            Ok(())
        })
        .await
        .map_err(map_db_err)?
    }

    async fn get(&self, user_id: Uuid, indexer_id: Uuid) -> Result<Option<UserIndexerConfig>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            conn.query_row(
                "SELECT * FROM user_indexer_configs WHERE user_id=?1 AND indexer_id=?2",
                params![user_id.to_string(), indexer_id.to_string()],
                row_to_user_config,
            )
            .optional()
            .map_err(map_db_err)
        })
        .await
        .map_err(map_db_err)?
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<UserIndexerConfig>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            let mut stmt = conn
                .prepare("SELECT * FROM user_indexer_configs WHERE user_id=?1")
                .map_err(map_db_err)?;
            let rows = stmt
                .query_map(params![user_id.to_string()], row_to_user_config)
                .map_err(map_db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_db_err)?;
            Ok(rows)
        })
        .await
        .map_err(map_db_err)?
    }

    async fn record_test_result(
        &self,
        user_id: Uuid,
        indexer_id: Uuid,
        success: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            conn.execute(
                "UPDATE user_indexer_configs SET last_test_at=?3, last_test_success=?4
                 WHERE user_id=?1 AND indexer_id=?2",
                params![user_id.to_string(), indexer_id.to_string(), at, success],
            )
            .map_err(map_db_err)?;
            Ok(())
        })
        .await
        .map_err(map_db_err)?
    }
}

fn row_to_user_config(row: &rusqlite::Row) -> rusqlite::Result<UserIndexerConfig> {
    Ok(UserIndexerConfig {
        user_id: parse_uuid(row.get::<_, String>("user_id")?),
        indexer_id: parse_uuid(row.get::<_, String>("indexer_id")?),
        is_enabled: row.get("is_enabled")?,
        api_key: row.get("api_key")?,
        username: row.get("username")?,
        password: row.get("password")?,
        last_test_at: row.get("last_test_at")?,
        last_test_success: row.get("last_test_success")?,
    })
}

#[async_trait]
impl HealthRepository for SqliteRepositories {
    async fn record(&self, health: &IndexerHealth) -> Result<()> {
        let pool = self.pool.clone();
        let health = health.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            conn.execute(
                "INSERT INTO indexer_health
                    (indexer_id, status, response_time_ms, error_message, checked_at)
                 VALUES (?1,?2,?3,?4,?5)",
                params![
                    health.indexer_id.to_string(),
                    status_str(health.status),
                    health.response_time_ms.map(|v| v as i64),
                    health.error_message,
                    health.checked_at,
                ],
            )
            .map_err(map_db_err)?;
            Ok(())
        })
        .await
        .map_err(map_db_err)?
    }

    async fn latest(&self, indexer_id: Uuid) -> Result<Option<IndexerHealth>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            conn.query_row(
                "SELECT indexer_id, status, response_time_ms, error_message, checked_at
                 FROM indexer_health WHERE indexer_id=?1 ORDER BY checked_at DESC LIMIT 1",
                params![indexer_id.to_string()],
                row_to_health,
            )
            .optional()
            .map_err(map_db_err)
        })
        .await
        .map_err(map_db_err)?
    }

    async fn latest_all(&self) -> Result<Vec<IndexerHealth>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            let mut stmt = conn
                .prepare(
                    "SELECT indexer_id, status, response_time_ms, error_message, MAX(checked_at) as checked_at
                     FROM indexer_health GROUP BY indexer_id",
                )
                .map_err(map_db_err)?;
            let rows = stmt
                .query_map([], row_to_health)
                .map_err(map_db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_db_err)?;
            Ok(rows)
        })
        .await
        .map_err(map_db_err)?
    }

    async fn prune_older_than(&self, horizon: DateTime<Utc>) -> Result<u64> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            let affected = conn
                .execute(
                    "DELETE FROM indexer_health WHERE checked_at < ?1",
                    params![horizon],
                )
                .map_err(map_db_err)?;
            Ok(affected as u64)
        })
        .await
        .map_err(map_db_err)?
    }
}

fn status_str(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Degraded => "degraded",
        HealthStatus::Down => "down",
        HealthStatus::Maintenance => "maintenance",
    }
}

fn row_to_health(row: &rusqlite::Row) -> rusqlite::Result<IndexerHealth> {
    let status: String = row.get("status")?;
    Ok(IndexerHealth {
        indexer_id: parse_uuid(row.get::<_, String>("indexer_id")?),
        status: parse_health_status(&status),
        response_time_ms: row.get::<_, Option<i64>>("response_time_ms")?.map(|v| v as u64),
        error_message: row.get("error_message")?,
        checked_at: row.get("checked_at")?,
    })
}

#[async_trait]
impl DownloadQueueRepository for SqliteRepositories {
    async fn insert(&self, item: &DownloadQueueItem) -> Result<()> {
        let pool = self.pool.clone();
        let item = item.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            insert_queue_item(&conn, &item)
        })
        .await
        .map_err(map_db_err)?
    }

    async fn get(&self, id: Uuid) -> Result<Option<DownloadQueueItem>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            conn.query_row(
                "SELECT * FROM download_queue WHERE id=?1",
                params![id.to_string()],
                row_to_queue_item,
            )
            .optional()
            .map_err(map_db_err)
        })
        .await
        .map_err(map_db_err)?
    }

    async fn list(&self, filter: &QueueListFilter) -> Result<QueuePage> {
        let pool = self.pool.clone();
        let filter = filter.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            let mut where_clauses = Vec::new();
            let mut bind: Vec<String> = Vec::new();
            if let Some(uid) = filter.user_id {
                where_clauses.push("user_id = ?".to_string());
                bind.push(uid.to_string());
            }
            if let Some(status) = filter.status {
                where_clauses.push("status = ?".to_string());
                bind.push(status_key(status).to_string());
            }
            let where_sql = if where_clauses.is_empty() {
                String::new()
            } else {
                format!("WHERE {}", where_clauses.join(" AND "))
            };

            let count_sql = format!("SELECT COUNT(*) FROM download_queue {where_sql}");
            let total: i64 = conn
                .query_row(
                    &count_sql,
                    rusqlite::params_from_iter(bind.iter()),
                    |r| r.get(0),
                )
                .map_err(map_db_err)?;

            let per_page = filter.per_page.max(1) as i64;
            let offset = (filter.page.max(1) as i64 - 1) * per_page;
            let list_sql = format!(
                "SELECT * FROM download_queue {where_sql}
                 ORDER BY priority DESC, created_at ASC LIMIT {per_page} OFFSET {offset}"
            );
            let mut stmt = conn.prepare(&list_sql).map_err(map_db_err)?;
            let items = stmt
                .query_map(rusqlite::params_from_iter(bind.iter()), row_to_queue_item)
                .map_err(map_db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_db_err)?;

            Ok(QueuePage {
                items,
                total: total as u64,
            })
        })
        .await
        .map_err(map_db_err)?
    }

    async fn select_next_pending(&self) -> Result<Option<DownloadQueueItem>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(map_db_err)?;
            let tx = conn
                .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
                .map_err(map_db_err)?;
            let next = tx
                .query_row(
                    "SELECT * FROM download_queue WHERE status='pending'
                     ORDER BY priority DESC, created_at ASC, id ASC LIMIT 1",
                    [],
                    row_to_queue_item,
                )
                .optional()
                .map_err(map_db_err)?;
            let Some(mut item) = next else {
                tx.commit().map_err(map_db_err)?;
                return Ok(None);
            };
            let now = Utc::now();
            item.status = DownloadStatus::Downloading;
            item.started_at = Some(now);
            item.updated_at = now;
            tx.execute(
                "UPDATE download_queue SET status='downloading', started_at=?2, updated_at=?2
                 WHERE id=?1",
                params![item.id.to_string(), now],
            )
            .map_err(map_db_err)?;
            tx.commit().map_err(map_db_err)?;
            Ok(Some(item))
        })
        .await
        .map_err(map_db_err)?
    }

    async fn active_downloads(&self, user_id: Option<Uuid>) -> Result<Vec<DownloadQueueItem>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            let (sql, uid) = match user_id {
                Some(uid) => (
                    "SELECT * FROM download_queue WHERE status='downloading' AND user_id=?1",
                    Some(uid.to_string()),
                ),
                None => ("SELECT * FROM download_queue WHERE status='downloading'", None),
            };
            let mut stmt = conn.prepare(sql).map_err(map_db_err)?;
            let rows = match uid {
                Some(uid) => stmt
                    .query_map(params![uid], row_to_queue_item)
                    .map_err(map_db_err)?
                    .collect::<rusqlite::Result<Vec<_>>>(),
                None => stmt
                    .query_map([], row_to_queue_item)
                    .map_err(map_db_err)?
                    .collect::<rusqlite::Result<Vec<_>>>(),
            }
            .map_err(map_db_err)?;
            Ok(rows)
        })
        .await
        .map_err(map_db_err)?
    }

    async fn update(&self, item: &DownloadQueueItem) -> Result<()> {
        let pool = self.pool.clone();
        let item = item.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            update_queue_item(&conn, &item)
        })
        .await
        .map_err(map_db_err)?
    }

    async fn update_progress(&self, id: Uuid, progress_percentage: u8) -> Result<()> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            conn.execute(
                "UPDATE download_queue SET progress_percentage=?2, updated_at=?3 WHERE id=?1",
                params![id.to_string(), progress_percentage, Utc::now()],
            )
            .map_err(map_db_err)?;
            Ok(())
        })
        .await
        .map_err(map_db_err)?
    }

    async fn finalize(&self, item: &DownloadQueueItem) -> Result<()> {
        let pool = self.pool.clone();
        let item = item.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(map_db_err)?;
            let tx = conn.transaction().map_err(map_db_err)?;
            update_queue_item(&tx, &item)?;
            let history: DownloadHistoryItem = (&item).into();
            tx.execute(
                "INSERT INTO download_history
                    (id, user_id, indexer_id, title, file_format, final_status, retry_count,
                     error_message, created_at, completed_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
                params![
                    history.id.to_string(),
                    history.user_id.to_string(),
                    history.indexer_id.to_string(),
                    history.title,
                    history.file_format.to_string(),
                    status_key(history.final_status),
                    history.retry_count,
                    history.error_message,
                    history.created_at,
                    history.completed_at,
                ],
            )
            .map_err(map_db_err)?;
            tx.commit().map_err(map_db_err)?;
            Ok(())
        })
        .await
        .map_err(map_db_err)?
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            conn.execute(
                "DELETE FROM download_queue WHERE id=?1",
                params![id.to_string()],
            )
            .map_err(map_db_err)?;
            Ok(())
        })
        .await
        .map_err(map_db_err)?
    }
}

fn status_key(status: DownloadStatus) -> &'static str {
    match status {
        DownloadStatus::Pending => "pending",
        DownloadStatus::Downloading => "downloading",
        DownloadStatus::Completed => "completed",
        DownloadStatus::Failed => "failed",
        DownloadStatus::Cancelled => "cancelled",
        DownloadStatus::Paused => "paused",
    }
}

fn insert_queue_item(conn: &Connection, item: &DownloadQueueItem) -> Result<()> {
    conn.execute(
        "INSERT INTO download_queue
            (id, user_id, book_id, indexer_id, title, author, download_url, file_format,
             file_size_bytes, priority, status, progress_percentage, download_path,
             quality_profile_id, retry_count, max_retries, error_message, checksum,
             created_at, updated_at, started_at, completed_at, estimated_completion)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23)",
        params![
            item.id.to_string(),
            item.user_id.to_string(),
            item.book_id.map(|v| v.to_string()),
            item.indexer_id.to_string(),
            item.title,
            item.author,
            item.download_url,
            item.file_format.to_string(),
            item.file_size_bytes.map(|v| v as i64),
            item.priority,
            status_key(item.status),
            item.progress_percentage,
            item.download_path,
            item.quality_profile_id.map(|v| v.to_string()),
            item.retry_count,
            item.max_retries,
            item.error_message,
            item.checksum,
            item.created_at,
            item.updated_at,
            item.started_at,
            item.completed_at,
            item.estimated_completion,
        ],
    )
    .map_err(map_db_err)?;
    Ok(())
}

fn update_queue_item(conn: &Connection, item: &DownloadQueueItem) -> Result<()> {
    let affected = conn
        .execute(
            "UPDATE download_queue SET
                title=?2, author=?3, download_url=?4, file_format=?5, file_size_bytes=?6,
                priority=?7, status=?8, progress_percentage=?9, download_path=?10,
                quality_profile_id=?11, retry_count=?12, max_retries=?13, error_message=?14,
                checksum=?15, updated_at=?16, started_at=?17, completed_at=?18,
                estimated_completion=?19
             WHERE id=?1",
            params![
                item.id.to_string(),
                item.title,
                item.author,
                item.download_url,
                item.file_format.to_string(),
                item.file_size_bytes.map(|v| v as i64),
                item.priority,
                status_key(item.status),
                item.progress_percentage,
                item.download_path,
                item.quality_profile_id.map(|v| v.to_string()),
                item.retry_count,
                item.max_retries,
                item.error_message,
                item.checksum,
                item.updated_at,
                item.started_at,
                item.completed_at,
                item.estimated_completion,
            ],
        )
        .map_err(map_db_err)?;
    if affected == 0 {
        return Err(Error::NotFound(format!("download queue item {}", item.id)));
    }
    Ok(())
}

#[async_trait]
impl SearchHistoryRepository for SqliteRepositories {
    async fn append(&self, entry: &SearchHistoryEntry) -> Result<()> {
        let pool = self.pool.clone();
        let entry = entry.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            let filters = serde_json::to_string(&entry.filters).map_err(map_db_err)?;
            let indexers =
                serde_json::to_string(&entry.indexers_searched).map_err(map_db_err)?;
            conn.execute(
                "INSERT INTO search_history
                    (id, user_id, query, filters, results_count, indexers_searched,
                     search_duration_ms, searched_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                params![
                    entry.id.to_string(),
                    entry.user_id.to_string(),
                    entry.query,
                    filters,
                    entry.results_count,
                    indexers,
                    entry.search_duration_ms,
                    entry.searched_at,
                ],
            )
            .map_err(map_db_err)?;
            Ok(())
        })
        .await
        .map_err(map_db_err)?
    }

    async fn recent_for_user(&self, user_id: Uuid, limit: u32) -> Result<Vec<SearchHistoryEntry>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, user_id, query, filters, results_count, indexers_searched,
                            search_duration_ms, searched_at
                     FROM search_history WHERE user_id=?1 ORDER BY searched_at DESC LIMIT ?2",
                )
                .map_err(map_db_err)?;
            let rows = stmt
                .query_map(params![user_id.to_string(), limit], row_to_history)
                .map_err(map_db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_db_err)?;
            Ok(rows)
        })
        .await
        .map_err(map_db_err)?
    }

    async fn prune_older_than(&self, horizon: DateTime<Utc>) -> Result<u64> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            let affected = conn
                .execute(
                    "DELETE FROM search_history WHERE searched_at < ?1",
                    params![horizon],
                )
                .map_err(map_db_err)?;
            Ok(affected as u64)
        })
        .await
        .map_err(map_db_err)?
    }
}

fn row_to_history(row: &rusqlite::Row) -> rusqlite::Result<SearchHistoryEntry> {
    let filters_raw: String = row.get("filters")?;
    let indexers_raw: String = row.get("indexers_searched")?;
    Ok(SearchHistoryEntry {
        id: parse_uuid(row.get::<_, String>("id")?),
        user_id: parse_uuid(row.get::<_, String>("user_id")?),
        query: row.get("query")?,
        filters: serde_json::from_str(&filters_raw).unwrap_or_else(|_| {
            crate::models::SearchRequest::new("")
        }),
        results_count: row.get::<_, i64>("results_count")? as usize,
        indexers_searched: serde_json::from_str(&indexers_raw).unwrap_or_default(),
        search_duration_ms: row.get::<_, i64>("search_duration_ms")? as u64,
        searched_at: row.get("searched_at")?,
    })
}

#[async_trait]
impl SearchCacheRepository for SqliteRepositories {
    async fn upsert(&self, entry: &CacheEntry) -> Result<()> {
        let pool = self.pool.clone();
        let entry = entry.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            let response = serde_json::to_string(&entry.response).map_err(map_db_err)?;
            conn.execute(
                "INSERT INTO search_cache
                    (fingerprint, response, created_at, expires_at, hit_count, size_estimate)
                 VALUES (?1,?2,?3,?4,?5,?6)
                 ON CONFLICT(fingerprint) DO UPDATE SET
                    response=excluded.response, created_at=excluded.created_at,
                    expires_at=excluded.expires_at, hit_count=excluded.hit_count,
                    size_estimate=excluded.size_estimate",
                params![
                    entry.fingerprint,
                    response,
                    entry.created_at,
                    entry.expires_at,
                    entry.hit_count,
                    entry.size_estimate,
                ],
            )
            .map_err(map_db_err)?;
            Ok(())
        })
        .await
        .map_err(map_db_err)?
    }

    async fn get_if_fresh(&self, fingerprint: &str) -> Result<Option<CacheEntry>> {
        let pool = self.pool.clone();
        let fingerprint = fingerprint.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            conn.query_row(
                "SELECT * FROM search_cache WHERE fingerprint=?1 AND expires_at > ?2",
                params![fingerprint, Utc::now()],
                row_to_cache_entry,
            )
            .optional()
            .map_err(map_db_err)
        })
        .await
        .map_err(map_db_err)?
    }

    async fn prune_expired(&self) -> Result<u64> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(map_db_err)?;
            let affected = conn
                .execute(
                    "DELETE FROM search_cache WHERE expires_at < ?1",
                    params![Utc::now()],
                )
                .map_err(map_db_err)?;
            Ok(affected as u64)
        })
        .await
        .map_err(map_db_err)?
    }
}

fn row_to_cache_entry(row: &rusqlite::Row) -> rusqlite::Result<CacheEntry> {
    let response_raw: String = row.get("response")?;
    let response: SearchResponse = serde_json::from_str(&response_raw).unwrap_or_else(|_| {
        SearchResponse::empty(String::new())
    });
    Ok(CacheEntry {
        fingerprint: row.get("fingerprint")?,
        response,
        created_at: row.get("created_at")?,
        expires_at: row.get("expires_at")?,
        hit_count: row.get::<_, i64>("hit_count")? as u64,
        size_estimate: row.get::<_, i64>("size_estimate")? as usize,
    })
}

/// Bundles the SQLite repository behind the `Repositories` container trait.
pub struct SqliteRepositoriesHandle(pub Arc<SqliteRepositories>);

impl Repositories for SqliteRepositoriesHandle {
    fn indexers(&self) -> &dyn IndexerRepository {
        self.0.as_ref()
    }
    fn user_indexer_configs(&self) -> &dyn UserIndexerConfigRepository {
        self.0.as_ref()
    }
    fn health(&self) -> &dyn HealthRepository {
        self.0.as_ref()
    }
    fn queue(&self) -> &dyn DownloadQueueRepository {
        self.0.as_ref()
    }
    fn search_history(&self) -> &dyn SearchHistoryRepository {
        self.0.as_ref()
    }
    fn search_cache(&self) -> &dyn SearchCacheRepository {
        self.0.as_ref()
    }
}

impl QueueListFilter {
    pub fn new() -> Self {
        Self {
            page: 1,
            per_page: 50,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookFormat, IndexerKind};

    fn sample_indexer() -> Indexer {
        Indexer {
            id: Uuid::new_v4(),
            name: "test-indexer".into(),
            base_url: "http://localhost".into(),
            api_path: None,
            kind: IndexerKind::Torznab,
            supports_search: true,
            supports_download: true,
            priority: 50,
            rate_limit_requests: 1,
            rate_limit_window_secs: 1,
            timeout_secs: 10,
            is_active: true,
            user_agent: "test".into(),
        }
    }

    #[tokio::test]
    async fn test_indexer_crud_roundtrip() {
        let repo = SqliteRepositories::in_memory().unwrap();
        let indexer = sample_indexer();
        repo.create(&indexer).await.unwrap();
        let fetched = repo.get(indexer.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "test-indexer");

        let dup = sample_indexer();
        let err = repo.create(&dup).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_select_next_pending_honors_priority_and_fifo() {
        let repo = SqliteRepositories::in_memory().unwrap();
        let indexer = sample_indexer();
        repo.create(&indexer).await.unwrap();

        let user = Uuid::new_v4();
        let mut items = Vec::new();
        for (label, priority) in [("A", 1), ("B", 10), ("C", 5), ("D", 15)] {
            let mut item = DownloadQueueItem::new(
                user,
                indexer.id,
                label.into(),
                "http://x/dl".into(),
                BookFormat::Epub,
                priority,
                3,
            );
            item.created_at = Utc::now();
            items.push(item.clone());
            repo.insert(&item).await.unwrap();
        }

        let first = repo.select_next_pending().await.unwrap().unwrap();
        assert_eq!(first.title, "D");
        let second = repo.select_next_pending().await.unwrap().unwrap();
        assert_eq!(second.title, "B");
    }

    #[tokio::test]
    async fn test_cache_roundtrip_and_expiry() {
        let repo = SqliteRepositories::in_memory().unwrap();
        let now = Utc::now();
        let entry = CacheEntry {
            fingerprint: "abc".into(),
            response: SearchResponse::empty("q".into()),
            created_at: now,
            expires_at: now + chrono::Duration::minutes(5),
            hit_count: 0,
            size_estimate: 10,
        };
        repo.upsert(&entry).await.unwrap();
        let fetched = repo.get_if_fresh("abc").await.unwrap();
        assert!(fetched.is_some());
        let missing = repo.get_if_fresh("nope").await.unwrap();
        assert!(missing.is_none());
    }
}
