use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Ebook file formats the core recognizes for extraction, filtering and
/// quality scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookFormat {
    Epub,
    Pdf,
    Mobi,
    Azw3,
    Txt,
    Rtf,
    Djvu,
    Fb2,
    Unknown,
}

impl fmt::Display for BookFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BookFormat::Epub => "epub",
            BookFormat::Pdf => "pdf",
            BookFormat::Mobi => "mobi",
            BookFormat::Azw3 => "azw3",
            BookFormat::Txt => "txt",
            BookFormat::Rtf => "rtf",
            BookFormat::Djvu => "djvu",
            BookFormat::Fb2 => "fb2",
            BookFormat::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl BookFormat {
    /// All formats the extension-matching scan in the adapter layer checks,
    /// in priority order (longest/most specific tokens first).
    pub const ALL: &'static [BookFormat] = &[
        BookFormat::Azw3,
        BookFormat::Epub,
        BookFormat::Mobi,
        BookFormat::Djvu,
        BookFormat::Fb2,
        BookFormat::Pdf,
        BookFormat::Rtf,
        BookFormat::Txt,
    ];

    /// Derive a format from a filename-extension-like token.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "epub" => Some(BookFormat::Epub),
            "pdf" => Some(BookFormat::Pdf),
            "mobi" => Some(BookFormat::Mobi),
            "azw3" | "azw" => Some(BookFormat::Azw3),
            "txt" => Some(BookFormat::Txt),
            "rtf" => Some(BookFormat::Rtf),
            "djvu" => Some(BookFormat::Djvu),
            "fb2" => Some(BookFormat::Fb2),
            _ => None,
        }
    }
}

/// A normalized search request, the input to the Aggregator.
///
/// `query` is trimmed on construction; an empty query is invalid and must be
/// rejected by the caller before reaching the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub indexers: Option<Vec<Uuid>>,
    #[serde(default)]
    pub formats: Option<Vec<BookFormat>>,
    #[serde(default)]
    pub languages: Option<Vec<String>>,
    #[serde(default)]
    pub min_quality: Option<u8>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
    #[serde(default = "default_true")]
    pub use_cache: bool,
}

fn default_timeout_s() -> u64 {
    20
}

fn default_true() -> bool {
    true
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into().trim().to_string(),
            indexers: None,
            formats: None,
            languages: None,
            min_quality: None,
            max_size_mb: None,
            limit: None,
            timeout_s: default_timeout_s(),
            use_cache: true,
        }
    }

    pub fn is_empty_query(&self) -> bool {
        self.query.trim().is_empty()
    }
}

/// A single hit returned by an indexer adapter, after uniform post-processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub indexer_id: Uuid,
    pub indexer_name: String,
    pub title: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub format: BookFormat,
    pub file_size_bytes: Option<u64>,
    pub quality_score: u8,
    pub relevance_score: f64,
    pub download_url: String,
    pub source_url: Option<String>,
    pub language: Option<String>,
    pub publication_year: Option<i32>,
    pub isbn: Option<String>,
    pub found_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Seeder count, when the originating protocol carries one (torrent
    /// flavoured indexers); `None` for pure HTTP/ebook hosts. Used by the
    /// quality-score seed in the adapter layer.
    #[serde(default)]
    pub seeders: Option<u32>,
}

impl SearchResult {
    pub fn clamp_scores(&mut self) {
        self.quality_score = self.quality_score.min(100);
        self.relevance_score = self.relevance_score.clamp(0.0, 1.0);
    }
}

/// Per-indexer bookkeeping returned alongside the aggregated result list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerSearchStat {
    pub indexer_id: Uuid,
    pub indexer_name: String,
    pub result_count: usize,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

/// The response produced by the Search Aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub total_results: usize,
    pub indexers_searched: Vec<IndexerSearchStat>,
    pub search_duration_ms: u64,
    pub cached: bool,
    pub cache_expires_at: Option<DateTime<Utc>>,
}

impl SearchResponse {
    pub fn empty(query: String) -> Self {
        Self {
            query,
            results: Vec::new(),
            total_results: 0,
            indexers_searched: Vec::new(),
            search_duration_ms: 0,
            cached: false,
            cache_expires_at: None,
        }
    }
}
