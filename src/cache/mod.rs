//! Cache Manager (Component G, §4.G). Two tiers: an in-process fast map
//! (tier 1) and the durable store (tier 2, `SearchCacheRepository`). Both
//! tiers mark the returned response `cached = true`; the fingerprint is a
//! SHA-256 hash over the canonical-serialized, normalized request so it is
//! stable across process restarts (§9 "replace the source's ad-hoc
//! byte-to-hex with a cryptographic hash").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{BookFormat, CacheEntry, SearchRequest, SearchResponse};
use crate::query::OptimizedQuery;
use crate::repository::SearchCacheRepository;

const DEFAULT_TTL_MINUTES: i64 = 60;

/// Stable inputs to the fingerprint, serialized in this fixed order
/// regardless of the request struct's field layout (§4.G).
fn canonical_fingerprint_input(optimized: &OptimizedQuery, request: &SearchRequest) -> String {
    let mut indexer_set: Vec<String> = request
        .indexers
        .as_ref()
        .map(|ids| ids.iter().map(Uuid::to_string).collect())
        .unwrap_or_default();
    indexer_set.sort();

    let mut formats: Vec<String> = request
        .formats
        .as_ref()
        .map(|fs| fs.iter().map(BookFormat::to_string).collect())
        .unwrap_or_default();
    formats.sort();

    let mut languages: Vec<String> = request.languages.clone().unwrap_or_default();
    languages.sort();

    format!(
        "query={}|indexers={}|formats={}|languages={}|min_quality={}|max_size_mb={}",
        optimized.analysis,
        indexer_set.join(","),
        formats.join(","),
        languages.join(","),
        request.min_quality.map(|v| v.to_string()).unwrap_or_default(),
        request.max_size_mb.map(|v| v.to_string()).unwrap_or_default(),
    )
}

pub fn fingerprint(optimized: &OptimizedQuery, request: &SearchRequest) -> String {
    let input = canonical_fingerprint_input(optimized, request);
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

struct Tier1Entry {
    entry: CacheEntry,
}

/// The in-process fast tier. Size cap is advisory (§5 shared-resources (b)):
/// a lock-protected map, evicted by ascending `hit_count / (1 + age_hours)`
/// when the cap is exceeded.
struct FastTier {
    entries: HashMap<String, Tier1Entry>,
    cap_bytes: usize,
    used_bytes: usize,
}

impl FastTier {
    fn new(cap_mb: u64) -> Self {
        Self {
            entries: HashMap::new(),
            cap_bytes: (cap_mb as usize) * 1024 * 1024,
            used_bytes: 0,
        }
    }

    fn insert(&mut self, entry: CacheEntry) {
        self.used_bytes += entry.size_estimate;
        self.entries.insert(
            entry.fingerprint.clone(),
            Tier1Entry { entry },
        );
        if self.used_bytes > self.cap_bytes {
            self.evict_quartile();
        }
    }

    fn evict_quartile(&mut self) {
        let now = Utc::now();
        let mut scored: Vec<(String, f64, usize)> = self
            .entries
            .values()
            .map(|e| {
                (
                    e.entry.fingerprint.clone(),
                    e.entry.eviction_score(now),
                    e.entry.size_estimate,
                )
            })
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        let evict_count = (scored.len() / 4).max(1);
        for (fingerprint, _, size) in scored.into_iter().take(evict_count) {
            self.entries.remove(&fingerprint);
            self.used_bytes = self.used_bytes.saturating_sub(size);
        }
    }

    fn get(&mut self, fingerprint: &str) -> Option<CacheEntry> {
        let now = Utc::now();
        let expired = self
            .entries
            .get(fingerprint)
            .is_some_and(|e| e.entry.is_expired(now));
        if expired {
            if let Some(e) = self.entries.remove(fingerprint) {
                self.used_bytes = self.used_bytes.saturating_sub(e.entry.size_estimate);
            }
            return None;
        }
        if let Some(e) = self.entries.get_mut(fingerprint) {
            e.entry.hit_count += 1;
            Some(e.entry.clone())
        } else {
            None
        }
    }
}

/// Two-tier result cache. Tier 2 reads/writes go through the injected
/// `SearchCacheRepository`; its absence would never be constructed here
/// since the container always wires a concrete store, but every call is
/// still best-effort from the aggregator's point of view (§4.E step 9).
pub struct CacheManager {
    fast: RwLock<FastTier>,
    durable: Arc<dyn SearchCacheRepository>,
    ttl: Duration,
}

impl CacheManager {
    pub fn new(durable: Arc<dyn SearchCacheRepository>, cap_mb: u64, ttl_minutes: i64) -> Self {
        Self {
            fast: RwLock::new(FastTier::new(cap_mb)),
            durable,
            ttl: Duration::from_secs((ttl_minutes.max(1) as u64) * 60),
        }
    }

    pub fn with_defaults(durable: Arc<dyn SearchCacheRepository>) -> Self {
        Self::new(durable, 64, DEFAULT_TTL_MINUTES)
    }

    /// Tier 1 first, then tier 2 (repopulating tier 1 on a tier-2 hit). Both
    /// paths mark the response `cached = true`.
    pub async fn get(&self, fingerprint: &str) -> Result<Option<SearchResponse>> {
        if let Some(entry) = self.fast.write().await.get(fingerprint) {
            let mut response = entry.response;
            response.cached = true;
            response.cache_expires_at = Some(entry.expires_at);
            return Ok(Some(response));
        }

        if let Some(entry) = self.durable.get_if_fresh(fingerprint).await? {
            let mut response = entry.response.clone();
            response.cached = true;
            response.cache_expires_at = Some(entry.expires_at);
            self.fast.write().await.insert(entry);
            return Ok(Some(response));
        }

        Ok(None)
    }

    /// Write-through to both tiers. Best-effort from the aggregator's
    /// perspective: callers should log, not surface, failures here.
    pub async fn put(&self, fingerprint: String, response: SearchResponse) -> Result<()> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(self.ttl).unwrap_or_default();
        let size_estimate = estimate_size(&response);
        let entry = CacheEntry {
            fingerprint,
            response,
            created_at: now,
            expires_at,
            hit_count: 0,
            size_estimate,
        };
        self.durable.upsert(&entry).await?;
        self.fast.write().await.insert(entry);
        Ok(())
    }

    /// Janitor pass: deletes expired tier-2 rows. Intended to be invoked
    /// periodically (§4.G "A janitor periodically deletes tier-2 rows").
    pub async fn prune_expired(&self) -> Result<u64> {
        self.durable.prune_expired().await
    }
}

fn estimate_size(response: &SearchResponse) -> usize {
    serde_json::to_vec(response).map(|v| v.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::optimize;
    use crate::repository::sqlite::SqliteRepositories;

    fn sample_request() -> SearchRequest {
        SearchRequest::new("Foundation Asimov")
    }

    #[test]
    fn test_fingerprint_is_stable_across_calls() {
        let optimized = optimize("Foundation Asimov");
        let request = sample_request();
        let a = fingerprint(&optimized, &request);
        let b = fingerprint(&optimized, &request);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_ignores_indexer_set_ordering() {
        let optimized = optimize("dune");
        let id_a = Uuid::new_v4();
        let id_b = Uuid::new_v4();
        let mut r1 = SearchRequest::new("dune");
        r1.indexers = Some(vec![id_a, id_b]);
        let mut r2 = SearchRequest::new("dune");
        r2.indexers = Some(vec![id_b, id_a]);
        assert_eq!(fingerprint(&optimized, &r1), fingerprint(&optimized, &r2));
    }

    #[tokio::test]
    async fn test_cache_roundtrip_through_repository() {
        let repo = Arc::new(SqliteRepositories::in_memory().unwrap());
        let manager = CacheManager::with_defaults(repo);
        let optimized = optimize("foundation");
        let request = sample_request();
        let fp = fingerprint(&optimized, &request);

        assert!(manager.get(&fp).await.unwrap().is_none());

        let response = SearchResponse::empty("foundation".into());
        manager.put(fp.clone(), response).await.unwrap();

        let hit = manager.get(&fp).await.unwrap().unwrap();
        assert!(hit.cached);
    }

    #[tokio::test]
    async fn test_fast_tier_hit_avoids_durable_lookup_but_stays_consistent() {
        let repo = Arc::new(SqliteRepositories::in_memory().unwrap());
        let manager = CacheManager::with_defaults(repo);
        let fp = "fp-1".to_string();
        manager
            .put(fp.clone(), SearchResponse::empty("q".into()))
            .await
            .unwrap();
        let first = manager.get(&fp).await.unwrap().unwrap();
        let second = manager.get(&fp).await.unwrap().unwrap();
        assert!(first.cached && second.cached);
    }
}
