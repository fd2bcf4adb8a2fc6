use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::search::SearchResponse;

/// A stored search-response cache row, keyed by request fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub response: SearchResponse,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: u64,
    pub size_estimate: usize,
}

impl CacheEntry {
    /// Eviction score used by the fast tier: lower sorts first for removal.
    pub fn eviction_score(&self, now: DateTime<Utc>) -> f64 {
        let age_hours = (now - self.created_at).num_seconds().max(0) as f64 / 3600.0;
        self.hit_count as f64 / (1.0 + age_hours)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
