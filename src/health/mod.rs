//! Health Monitor (Component C, §4.C). Owns the in-process
//! `indexer_id -> IndexerHealth` cache; the durable store is authoritative
//! and is reconciled into the cache on cold start (§3 "Ownership").
//!
//! The cyclic "Manager owns Monitor, Monitor calls back into Manager for
//! indexer listing" reference in the donor's domain is resolved per §9: this
//! type depends only on `HealthRepository` and a list of indexers handed to
//! it by the owning container, never on the registry that constructs
//! adapters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;
use crate::indexer::Adapter;
use crate::models::{HealthStatus, IndexerHealth};
use crate::repository::HealthRepository;

const DEFAULT_CHECK_INTERVAL_SECS: u64 = 15 * 60;
const DEFAULT_HEALTH_THRESHOLD_SECS: i64 = 30 * 60;

/// A probeable indexer registration: identity plus the adapter used for
/// `test_connection`, and the set of users that currently have it enabled.
pub struct ProbeTarget {
    pub indexer_id: Uuid,
    pub adapter: Arc<dyn Adapter>,
}

#[async_trait]
pub trait EnabledIndexerLookup: Send + Sync {
    /// Enabled, active indexer ids for a user, per the §9 Open Question
    /// resolution: `is_active AND exists(UserIndexerConfig) AND
    /// UserIndexerConfig.is_enabled`.
    async fn enabled_indexer_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>>;
}

pub struct HealthMonitor {
    repo: Arc<dyn HealthRepository>,
    cache: RwLock<HashMap<Uuid, IndexerHealth>>,
    check_interval: RwLock<Duration>,
    health_threshold: RwLock<ChronoDuration>,
    cancel: CancellationToken,
}

impl HealthMonitor {
    pub fn new(repo: Arc<dyn HealthRepository>) -> Self {
        Self {
            repo,
            cache: RwLock::new(HashMap::new()),
            check_interval: RwLock::new(Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS)),
            health_threshold: RwLock::new(ChronoDuration::seconds(DEFAULT_HEALTH_THRESHOLD_SECS)),
            cancel: CancellationToken::new(),
        }
    }

    /// Reconcile the in-process cache from the durable store. Call on cold
    /// start (§3 "the in-process health cache ... must reconcile with the
    /// store on cold start").
    pub async fn reconcile(&self) -> Result<()> {
        let rows = self.repo.latest_all().await?;
        let mut cache = self.cache.write().await;
        for row in rows {
            cache.insert(row.indexer_id, row);
        }
        Ok(())
    }

    /// Atomic update of both thresholds under the single writer lock (§4.C).
    pub async fn configure(&self, check_interval: Duration, health_threshold: ChronoDuration) {
        *self.check_interval.write().await = check_interval;
        *self.health_threshold.write().await = health_threshold;
    }

    pub async fn record(
        &self,
        indexer_id: Uuid,
        status: HealthStatus,
        response_time_ms: Option<u64>,
        error_message: Option<String>,
    ) -> Result<()> {
        let health = IndexerHealth {
            indexer_id,
            status,
            response_time_ms,
            error_message,
            checked_at: Utc::now(),
        };
        self.repo.record(&health).await?;
        self.cache.write().await.insert(indexer_id, health);
        Ok(())
    }

    /// Cache-first lookup; on miss, load the latest record from the store.
    pub async fn get(&self, indexer_id: Uuid) -> Result<Option<IndexerHealth>> {
        if let Some(h) = self.cache.read().await.get(&indexer_id).cloned() {
            return Ok(Some(h));
        }
        let loaded = self.repo.latest(indexer_id).await?;
        if let Some(h) = &loaded {
            self.cache.write().await.insert(indexer_id, h.clone());
        }
        Ok(loaded)
    }

    /// The user's enabled indexers whose most recent record is `healthy` or
    /// `degraded` and whose age is within `health_threshold`; indexers with
    /// no record at all are assumed healthy (new-indexer grace). Stale
    /// records synchronously downgrade to `down`.
    pub async fn healthy_indexers(&self, enabled_ids: &[Uuid]) -> Result<Vec<Uuid>> {
        let threshold = *self.health_threshold.read().await;
        let now = Utc::now();
        let mut healthy = Vec::with_capacity(enabled_ids.len());
        for &id in enabled_ids {
            match self.get(id).await? {
                None => healthy.push(id),
                Some(record) => {
                    let age = now - record.checked_at;
                    if age > threshold {
                        self.record(
                            id,
                            HealthStatus::Down,
                            None,
                            Some("health record stale".to_string()),
                        )
                        .await?;
                        continue;
                    }
                    if matches!(record.status, HealthStatus::Healthy | HealthStatus::Degraded) {
                        healthy.push(id);
                    }
                }
            }
        }
        Ok(healthy)
    }

    /// `healthy_indexers` minus `exclude_ids`.
    pub async fn failover(&self, enabled_ids: &[Uuid], exclude_ids: &[Uuid]) -> Result<Vec<Uuid>> {
        let healthy = self.healthy_indexers(enabled_ids).await?;
        Ok(healthy
            .into_iter()
            .filter(|id| !exclude_ids.contains(id))
            .collect())
    }

    /// Run the periodic probe loop until `stop` is called. Probes every
    /// active target concurrently at `check_interval`.
    pub async fn run(self: Arc<Self>, targets: Vec<ProbeTarget>) {
        loop {
            let interval = *self.check_interval.read().await;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {},
                _ = self.cancel.cancelled() => return,
            }
            self.probe_once(&targets).await;
        }
    }

    /// Probe every target concurrently; used by both the periodic loop and
    /// tests. Draining in-flight probes before `stop()` returns is handled
    /// by awaiting this join.
    pub async fn probe_once(&self, targets: &[ProbeTarget]) {
        let futures = targets.iter().map(|target| {
            let repo = self.repo.clone();
            let indexer_id = target.indexer_id;
            let adapter = target.adapter.clone();
            async move {
                let cancel = CancellationToken::new();
                let result = adapter.test_connection(&cancel).await;
                let health = if result.success {
                    IndexerHealth {
                        indexer_id,
                        status: HealthStatus::Healthy,
                        response_time_ms: Some(result.response_time_ms),
                        error_message: None,
                        checked_at: Utc::now(),
                    }
                } else {
                    IndexerHealth {
                        indexer_id,
                        status: HealthStatus::Down,
                        response_time_ms: Some(result.response_time_ms),
                        error_message: result.error,
                        checked_at: Utc::now(),
                    }
                };
                if let Err(e) = repo.record(&health).await {
                    tracing::warn!(indexer_id = %indexer_id, error = %e, "failed to persist health probe");
                }
                (indexer_id, health)
            }
        });
        let results = futures::future::join_all(futures).await;
        let mut cache = self.cache.write().await;
        for (id, health) in results {
            cache.insert(id, health);
        }
    }

    /// Signal the loop to stop. `run`'s in-flight `probe_once` call is
    /// awaited to completion before the loop observes cancellation, so a
    /// caller that awaits the `run` join handle after calling `stop` has
    /// drained in-flight probes (§4.C "Stopping the monitor must drain
    /// in-flight probes before returning").
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::indexer::Adapter;
    use crate::models::{IndexerKind, IndexerTestResult, SearchRequest, SearchResponse};
    use crate::repository::sqlite::SqliteRepositories;

    struct FakeAdapter {
        succeed: bool,
    }

    #[async_trait]
    impl Adapter for FakeAdapter {
        fn name(&self) -> &str {
            "fake"
        }
        fn kind(&self) -> IndexerKind {
            IndexerKind::Api
        }
        async fn search(
            &self,
            _request: &SearchRequest,
            _cancel: &CancellationToken,
        ) -> std::result::Result<SearchResponse, Error> {
            Ok(SearchResponse::empty("".into()))
        }
        async fn test_connection(&self, _cancel: &CancellationToken) -> IndexerTestResult {
            IndexerTestResult {
                success: self.succeed,
                response_time_ms: 5,
                version: None,
                capabilities: vec![],
                error: if self.succeed {
                    None
                } else {
                    Some("boom".into())
                },
            }
        }
    }

    #[tokio::test]
    async fn test_new_indexer_with_no_record_is_healthy_by_grace() {
        let repo = Arc::new(SqliteRepositories::in_memory().unwrap());
        let monitor = HealthMonitor::new(repo);
        let id = Uuid::new_v4();
        let healthy = monitor.healthy_indexers(&[id]).await.unwrap();
        assert_eq!(healthy, vec![id]);
    }

    #[tokio::test]
    async fn test_stale_record_is_marked_down_and_excluded() {
        let repo = Arc::new(SqliteRepositories::in_memory().unwrap());
        let monitor = HealthMonitor::new(repo);
        monitor
            .configure(Duration::from_secs(900), ChronoDuration::milliseconds(1))
            .await;
        let id = Uuid::new_v4();
        monitor
            .record(id, HealthStatus::Healthy, Some(10), None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let healthy = monitor.healthy_indexers(&[id]).await.unwrap();
        assert!(healthy.is_empty());
        let record = monitor.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, HealthStatus::Down);
    }

    #[tokio::test]
    async fn test_failover_excludes_given_ids() {
        let repo = Arc::new(SqliteRepositories::in_memory().unwrap());
        let monitor = HealthMonitor::new(repo);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        monitor.record(a, HealthStatus::Healthy, Some(1), None).await.unwrap();
        monitor.record(b, HealthStatus::Healthy, Some(1), None).await.unwrap();
        let result = monitor.failover(&[a, b], &[a]).await.unwrap();
        assert_eq!(result, vec![b]);
    }

    #[tokio::test]
    async fn test_probe_once_records_down_on_failure() {
        let repo = Arc::new(SqliteRepositories::in_memory().unwrap());
        let monitor = HealthMonitor::new(repo);
        let id = Uuid::new_v4();
        let targets = vec![ProbeTarget {
            indexer_id: id,
            adapter: Arc::new(FakeAdapter { succeed: false }),
        }];
        monitor.probe_once(&targets).await;
        let record = monitor.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, HealthStatus::Down);
    }
}
