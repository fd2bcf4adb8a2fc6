use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The wire protocol an indexer speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexerKind {
    Torznab,
    Newznab,
    Rss,
    Html,
    Api,
}

impl fmt::Display for IndexerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexerKind::Torznab => "torznab",
            IndexerKind::Newznab => "newznab",
            IndexerKind::Rss => "rss",
            IndexerKind::Html => "html",
            IndexerKind::Api => "api",
        };
        write!(f, "{s}")
    }
}

/// An admin-managed indexer definition.
///
/// `name` is unique; `rate_limit_requests`/`rate_limit_window_secs` are both
/// ≥ 1; `timeout_secs` ∈ [5, 300]; `priority` ∈ [1, 100] (higher = preferred).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Indexer {
    pub id: Uuid,
    pub name: String,
    pub base_url: String,
    pub api_path: Option<String>,
    pub kind: IndexerKind,
    pub supports_search: bool,
    pub supports_download: bool,
    pub priority: i32,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u32,
    pub timeout_secs: u32,
    pub is_active: bool,
    pub user_agent: String,
}

impl Indexer {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("indexer name must not be empty".into());
        }
        if self.rate_limit_requests < 1 || self.rate_limit_window_secs < 1 {
            return Err("rate limit must be at least 1 request per 1 second".into());
        }
        if !(5..=300).contains(&self.timeout_secs) {
            return Err("timeout_secs must be within [5, 300]".into());
        }
        if !(1..=100).contains(&self.priority) {
            return Err("priority must be within [1, 100]".into());
        }
        Ok(())
    }
}

/// Per-user enablement and credentials for an indexer.
///
/// Unique on `(user_id, indexer_id)`. Credentials are never surfaced in
/// listings — callers see only booleans indicating presence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIndexerConfig {
    pub user_id: Uuid,
    pub indexer_id: Uuid,
    pub is_enabled: bool,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    #[serde(skip_serializing)]
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub last_test_at: Option<DateTime<Utc>>,
    pub last_test_success: Option<bool>,
}

impl UserIndexerConfig {
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() || (self.username.is_some() && self.password.is_some())
    }
}

/// Health status an indexer may be observed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
    Maintenance,
}

/// An append-only health observation. The latest row per indexer is
/// authoritative; rows older than the retention horizon may be pruned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerHealth {
    pub indexer_id: Uuid,
    pub status: HealthStatus,
    pub response_time_ms: Option<u64>,
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Result of an explicit connectivity test against an indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerTestResult {
    pub success: bool,
    pub response_time_ms: u64,
    pub version: Option<String>,
    pub capabilities: Vec<String>,
    pub error: Option<String>,
}
