//! Core data models shared across the search and download orchestration engine.

mod cache;
mod history;
mod indexer;
mod profile;
mod queue;
mod search;

pub use cache::CacheEntry;
pub use history::SearchHistoryEntry;
pub use indexer::{
    HealthStatus, Indexer, IndexerHealth, IndexerKind, IndexerTestResult, UserIndexerConfig,
};
pub use profile::{DownloadFolder, QualityProfile, UserPreferences};
pub use queue::{DownloadHistoryItem, DownloadQueueItem, DownloadStatus};
pub use search::{BookFormat, IndexerSearchStat, SearchRequest, SearchResponse, SearchResult};
