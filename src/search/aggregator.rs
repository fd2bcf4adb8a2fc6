//! Search Aggregator (Component E, §4.E). Fans a normalized request out
//! across the user's healthy indexers, bounded by a process-wide
//! concurrency semaphore and a request deadline, then hands the combined
//! results to the Result Processor.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::{self, CacheManager};
use crate::error::{Error, Result};
use crate::health::{EnabledIndexerLookup, HealthMonitor};
use crate::indexer::registry::IndexerRegistry;
use crate::models::{
    HealthStatus, IndexerSearchStat, SearchHistoryEntry, SearchRequest, SearchResponse,
};
use crate::query;
use crate::repository::{SearchHistoryRepository, UserIndexerConfigRepository};
use crate::search::processor;

const DEFAULT_GLOBAL_TIMEOUT_CEILING_SECS: u64 = 60;

/// Resolves a user's enabled+active indexer set per the §9 Open Question
/// resolution: `is_active AND exists(UserIndexerConfig) AND
/// UserIndexerConfig.is_enabled`.
pub struct RegistryIndexerLookup {
    pub registry: Arc<IndexerRegistry>,
    pub configs: Arc<dyn UserIndexerConfigRepository>,
}

#[async_trait]
impl EnabledIndexerLookup for RegistryIndexerLookup {
    async fn enabled_indexer_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let configs = self.configs.list_for_user(user_id).await?;
        let active_ids: HashSet<Uuid> = self.registry.active_ids().into_iter().collect();
        Ok(configs
            .into_iter()
            .filter(|c| c.is_enabled && active_ids.contains(&c.indexer_id))
            .map(|c| c.indexer_id)
            .collect())
    }
}

pub struct SearchAggregator {
    registry: Arc<IndexerRegistry>,
    health: Arc<HealthMonitor>,
    cache: Arc<CacheManager>,
    lookup: Arc<dyn EnabledIndexerLookup>,
    search_history: Arc<dyn SearchHistoryRepository>,
    semaphore: Arc<Semaphore>,
    global_timeout_ceiling: Duration,
}

impl SearchAggregator {
    pub fn new(
        registry: Arc<IndexerRegistry>,
        health: Arc<HealthMonitor>,
        cache: Arc<CacheManager>,
        lookup: Arc<dyn EnabledIndexerLookup>,
        search_history: Arc<dyn SearchHistoryRepository>,
        max_concurrent_searches: usize,
    ) -> Self {
        Self {
            registry,
            health,
            cache,
            lookup,
            search_history,
            semaphore: Arc::new(Semaphore::new(max_concurrent_searches.max(1))),
            global_timeout_ceiling: Duration::from_secs(DEFAULT_GLOBAL_TIMEOUT_CEILING_SECS),
        }
    }

    /// `cancel` is the caller's cancellation handle (§5 "every public
    /// operation accepts a cancellation token") — an HTTP route ties it to
    /// client disconnect, a test ties it to a manual trigger. It is combined
    /// with the request's own deadline via a child token: either the caller
    /// cancelling or the deadline firing aborts in-flight adapter calls the
    /// same way.
    pub async fn search(
        &self,
        user_id: Uuid,
        request: SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse> {
        if request.is_empty_query() {
            return Err(Error::InvalidArgument("query must not be empty".into()));
        }

        let optimized = query::optimize(&request.query);
        let fingerprint = cache::fingerprint(&optimized, &request);

        if request.use_cache
            && let Some(cached) = self.cache.get(&fingerprint).await.unwrap_or(None)
        {
            return Ok(cached);
        }

        let enabled_ids = self.lookup.enabled_indexer_ids(user_id).await?;
        let restricted: Vec<Uuid> = match &request.indexers {
            Some(wanted) => enabled_ids
                .into_iter()
                .filter(|id| wanted.contains(id))
                .collect(),
            None => enabled_ids,
        };

        let healthy_ids = self.health.healthy_indexers(&restricted).await?;
        if healthy_ids.is_empty() {
            return Ok(SearchResponse::empty(request.query));
        }

        let targets: Vec<(Uuid, Arc<dyn crate::indexer::Adapter>, String)> = healthy_ids
            .iter()
            .filter_map(|id| {
                let adapter = self.registry.get(*id)?;
                let name = self
                    .registry
                    .indexer(*id)
                    .map(|i| i.name)
                    .unwrap_or_default();
                Some((*id, adapter, name))
            })
            .collect();

        let deadline = Duration::from_secs(request.timeout_s).min(self.global_timeout_ceiling);
        let cancel = cancel.child_token();
        let timer_cancel = cancel.clone();
        let timer = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(deadline) => timer_cancel.cancel(),
                _ = timer_cancel.cancelled() => {},
            }
        });

        let mut normalized_request = request.clone();
        normalized_request.query = optimized.outgoing.clone();

        let mut handles = Vec::with_capacity(targets.len());
        for (indexer_id, adapter, name) in targets {
            let permit = self.semaphore.clone().acquire_owned().await.ok();
            let cancel = cancel.clone();
            let request = normalized_request.clone();
            let health = self.health.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let started = Instant::now();
                let outcome = adapter.search(&request, &cancel).await;
                let elapsed_ms = started.elapsed().as_millis() as u64;

                let stat = match &outcome {
                    Ok(response) => {
                        if let Err(e) = health
                            .record(indexer_id, HealthStatus::Healthy, Some(elapsed_ms), None)
                            .await
                        {
                            tracing::warn!(indexer_id = %indexer_id, error = %e, "health write failed");
                        }
                        IndexerSearchStat {
                            indexer_id,
                            indexer_name: name,
                            result_count: response.results.len(),
                            response_time_ms: elapsed_ms,
                            error: None,
                        }
                    }
                    Err(e) => {
                        if let Err(record_err) = health
                            .record(indexer_id, HealthStatus::Down, Some(elapsed_ms), Some(e.to_string()))
                            .await
                        {
                            tracing::warn!(indexer_id = %indexer_id, error = %record_err, "health write failed");
                        }
                        IndexerSearchStat {
                            indexer_id,
                            indexer_name: name,
                            result_count: 0,
                            response_time_ms: elapsed_ms,
                            error: Some(e.to_string()),
                        }
                    }
                };

                let results = outcome.map(|r| r.results).unwrap_or_default();
                (stat, results)
            }));
        }

        let started = Instant::now();
        let mut stats = Vec::new();
        let mut all_results = Vec::new();
        for handle in handles {
            match handle.await {
                Ok((stat, results)) => {
                    stats.push(stat);
                    all_results.extend(results);
                }
                Err(e) => tracing::error!(error = %e, "indexer task panicked"),
            }
        }
        timer.abort();

        let was_cancelled = cancel.is_cancelled();
        let processed = processor::process(all_results, &optimized.outgoing, &request);
        let search_duration_ms = started.elapsed().as_millis() as u64;

        let mut response = SearchResponse {
            query: request.query.clone(),
            total_results: processed.len(),
            results: processed,
            indexers_searched: stats,
            search_duration_ms,
            cached: false,
            cache_expires_at: None,
        };

        if request.use_cache && !was_cancelled {
            if let Err(e) = self.cache.put(fingerprint, response.clone()).await {
                tracing::warn!(error = %e, "failed to write search cache entry");
            }
        }

        let history = SearchHistoryEntry {
            id: Uuid::new_v4(),
            user_id,
            query: request.query.clone(),
            filters: request.clone(),
            results_count: response.total_results,
            indexers_searched: response.indexers_searched.iter().map(|s| s.indexer_id).collect(),
            search_duration_ms,
            searched_at: Utc::now(),
        };
        if let Err(e) = self.search_history.append(&history).await {
            tracing::warn!(error = %e, "failed to write search history");
        }

        response.cached = false;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IndexerTestResult, SearchResult};
    use crate::repository::sqlite::SqliteRepositories;
    use std::time::Duration as StdDuration;

    struct SlowAdapter {
        delay: StdDuration,
        name: String,
    }

    #[async_trait]
    impl crate::indexer::Adapter for SlowAdapter {
        fn name(&self) -> &str {
            &self.name
        }
        fn kind(&self) -> crate::models::IndexerKind {
            crate::models::IndexerKind::Api
        }
        async fn search(
            &self,
            request: &SearchRequest,
            cancel: &CancellationToken,
        ) -> std::result::Result<SearchResponse, Error> {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {
                    Ok(SearchResponse {
                        query: request.query.clone(),
                        results: vec![SearchResult {
                            indexer_id: Uuid::new_v4(),
                            indexer_name: self.name.clone(),
                            title: format!("{} result", request.query),
                            author: None,
                            description: None,
                            format: crate::models::BookFormat::Epub,
                            file_size_bytes: Some(2 * 1024 * 1024),
                            quality_score: 50,
                            relevance_score: 0.0,
                            download_url: "http://x/dl".into(),
                            source_url: None,
                            language: None,
                            publication_year: None,
                            isbn: None,
                            found_at: Utc::now(),
                            metadata: Default::default(),
                            seeders: None,
                        }],
                        total_results: 1,
                        indexers_searched: vec![],
                        search_duration_ms: 0,
                        cached: false,
                        cache_expires_at: None,
                    })
                }
                _ = cancel.cancelled() => Err(Error::Timeout),
            }
        }
        async fn test_connection(&self, _cancel: &CancellationToken) -> IndexerTestResult {
            IndexerTestResult {
                success: true,
                response_time_ms: 1,
                version: None,
                capabilities: vec![],
                error: None,
            }
        }
    }

    struct FixedLookup(Vec<Uuid>);

    #[async_trait]
    impl EnabledIndexerLookup for FixedLookup {
        async fn enabled_indexer_ids(&self, _user_id: Uuid) -> Result<Vec<Uuid>> {
            Ok(self.0.clone())
        }
    }

    fn make_aggregator(registry: IndexerRegistry, enabled: Vec<Uuid>) -> SearchAggregator {
        let repo = Arc::new(SqliteRepositories::in_memory().unwrap());
        let health = Arc::new(HealthMonitor::new(repo.clone()));
        let cache = Arc::new(CacheManager::with_defaults(repo.clone()));
        SearchAggregator::new(
            Arc::new(registry),
            health,
            cache,
            Arc::new(FixedLookup(enabled)),
            repo,
            4,
        )
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let aggregator = make_aggregator(IndexerRegistry::new(), vec![]);
        let err = aggregator
            .search(Uuid::new_v4(), SearchRequest::new("   "), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_no_enabled_indexers_returns_empty_not_error() {
        let aggregator = make_aggregator(IndexerRegistry::new(), vec![]);
        let response = aggregator
            .search(Uuid::new_v4(), SearchRequest::new("dune"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.total_results, 0);
        assert!(response.indexers_searched.is_empty());
    }

    #[tokio::test]
    async fn test_one_slow_indexer_times_out_while_others_succeed() {
        let mut registry = IndexerRegistry::new();
        let fast_id = Uuid::new_v4();
        let slow_id = Uuid::new_v4();
        registry.register_for_test(
            fast_id,
            "fast",
            Arc::new(SlowAdapter {
                delay: StdDuration::from_millis(5),
                name: "fast".into(),
            }),
        );
        registry.register_for_test(
            slow_id,
            "slow",
            Arc::new(SlowAdapter {
                delay: StdDuration::from_secs(5),
                name: "slow".into(),
            }),
        );

        let aggregator = make_aggregator(registry, vec![fast_id, slow_id]);
        let mut request = SearchRequest::new("dune");
        request.timeout_s = 1;
        let response = aggregator
            .search(Uuid::new_v4(), request, &CancellationToken::new())
            .await
            .unwrap();

        let errored = response
            .indexers_searched
            .iter()
            .filter(|s| s.error.is_some())
            .count();
        let ok = response
            .indexers_searched
            .iter()
            .filter(|s| s.error.is_none())
            .count();
        assert_eq!(errored, 1);
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn test_external_cancellation_aborts_before_deadline() {
        let mut registry = IndexerRegistry::new();
        let slow_id = Uuid::new_v4();
        registry.register_for_test(
            slow_id,
            "slow",
            Arc::new(SlowAdapter {
                delay: StdDuration::from_secs(5),
                name: "slow".into(),
            }),
        );

        let aggregator = make_aggregator(registry, vec![slow_id]);
        let mut request = SearchRequest::new("dune");
        request.timeout_s = 30;
        let cancel = CancellationToken::new();
        let external = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(StdDuration::from_millis(20)).await;
            external.cancel();
        });

        let response = aggregator.search(Uuid::new_v4(), request, &cancel).await.unwrap();
        assert_eq!(response.indexers_searched.len(), 1);
        assert!(response.indexers_searched[0].error.is_some());
    }
}
