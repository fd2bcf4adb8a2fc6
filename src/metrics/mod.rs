//! Metrics / Audit (Component J, §4.J). Per-operation performance counters
//! plus the slow-operation warning; search-history and health-record
//! retention sweeps are driven from here.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

const DEFAULT_SLOW_OPERATION_THRESHOLD: Duration = Duration::from_secs(2);

pub const DEFAULT_CACHE_RETENTION_MINUTES: i64 = 60;
pub const DEFAULT_HEALTH_RETENTION_DAYS: i64 = 30;
pub const DEFAULT_SEARCH_HISTORY_RETENTION_DAYS: i64 = 90;

#[derive(Debug, Clone, Copy, Default)]
pub struct OperationCounters {
    pub count: u64,
    pub total_time: Duration,
    pub min: Option<Duration>,
    pub max: Option<Duration>,
    pub error_count: u64,
    pub last_execution: Option<DateTime<Utc>>,
}

impl OperationCounters {
    fn record(&mut self, duration: Duration, succeeded: bool) {
        self.count += 1;
        self.total_time += duration;
        self.min = Some(self.min.map_or(duration, |m| m.min(duration)));
        self.max = Some(self.max.map_or(duration, |m| m.max(duration)));
        if !succeeded {
            self.error_count += 1;
        }
        self.last_execution = Some(Utc::now());
    }

    pub fn average(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_time / self.count as u32
        }
    }
}

/// Registry of per-operation counters, keyed by operation name
/// (`"search.aggregate"`, `"queue.download"`, `"indexer.probe:<name>"`, …).
pub struct MetricsRegistry {
    counters: RwLock<HashMap<String, OperationCounters>>,
    slow_threshold: Duration,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_slow_threshold(DEFAULT_SLOW_OPERATION_THRESHOLD)
    }

    pub fn with_slow_threshold(slow_threshold: Duration) -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            slow_threshold,
        }
    }

    /// Record one completed operation. Emits a structured warning when
    /// `duration` exceeds the slow-operation threshold (§4.J).
    pub async fn record(&self, operation: &str, duration: Duration, succeeded: bool) {
        {
            let mut counters = self.counters.write().await;
            counters.entry(operation.to_string()).or_default().record(duration, succeeded);
        }
        if duration > self.slow_threshold {
            tracing::warn!(
                operation,
                duration_ms = duration.as_millis() as u64,
                threshold_ms = self.slow_threshold.as_millis() as u64,
                "slow operation"
            );
        }
    }

    pub async fn snapshot(&self, operation: &str) -> Option<OperationCounters> {
        self.counters.read().await.get(operation).copied()
    }

    pub async fn all(&self) -> HashMap<String, OperationCounters> {
        self.counters.read().await.clone()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Measures an async operation and records it against `registry`, returning
/// the wrapped result unchanged.
pub async fn timed<F, T, E>(registry: &MetricsRegistry, operation: &str, fut: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let started = std::time::Instant::now();
    let result = fut.await;
    registry
        .record(operation, started.elapsed(), result.is_ok())
        .await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counters_accumulate_and_track_errors() {
        let registry = MetricsRegistry::new();
        registry.record("search.aggregate", Duration::from_millis(10), true).await;
        registry.record("search.aggregate", Duration::from_millis(30), false).await;
        let snapshot = registry.snapshot("search.aggregate").await.unwrap();
        assert_eq!(snapshot.count, 2);
        assert_eq!(snapshot.error_count, 1);
        assert_eq!(snapshot.min, Some(Duration::from_millis(10)));
        assert_eq!(snapshot.max, Some(Duration::from_millis(30)));
    }

    #[tokio::test]
    async fn test_timed_helper_records_success_and_failure() {
        let registry = MetricsRegistry::new();
        let ok: Result<(), &str> = timed(&registry, "op", async { Ok(()) }).await;
        assert!(ok.is_ok());
        let err: Result<(), &str> = timed(&registry, "op", async { Err("boom") }).await;
        assert!(err.is_err());
        let snapshot = registry.snapshot("op").await.unwrap();
        assert_eq!(snapshot.count, 2);
        assert_eq!(snapshot.error_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_operation_snapshot_is_none() {
        let registry = MetricsRegistry::new();
        assert!(registry.snapshot("nonexistent").await.is_none());
    }
}
