//! The uniform capability set every indexer adapter implements. The
//! aggregator depends only on this trait, never on a concrete adapter type
//! (§9 "runtime polymorphism over indexers").

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::models::{IndexerKind, IndexerTestResult, SearchRequest, SearchResponse};

#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> IndexerKind;

    /// Translate the canonical request into the adapter's wire protocol,
    /// execute it, and parse the response back into canonical results.
    /// Errors here are always indexer-local — the aggregator wraps them with
    /// indexer identity and continues with the rest of the fan-out.
    async fn search(
        &self,
        request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse, Error>;

    /// Probe connectivity without requiring a dedicated wire operation.
    async fn test_connection(&self, cancel: &CancellationToken) -> IndexerTestResult {
        let started = std::time::Instant::now();
        let probe = SearchRequest {
            timeout_s: 5,
            limit: Some(1),
            ..SearchRequest::new("test")
        };
        match self.search(&probe, cancel).await {
            Ok(_) => IndexerTestResult {
                success: true,
                response_time_ms: started.elapsed().as_millis() as u64,
                version: None,
                capabilities: vec!["search".to_string()],
                error: None,
            },
            Err(e) => IndexerTestResult {
                success: false,
                response_time_ms: started.elapsed().as_millis() as u64,
                version: None,
                capabilities: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    }
}

/// Post-processing shared by every adapter before results leave the
/// indexer layer (§4.B).
pub mod postprocess {
    use crate::models::BookFormat;

    /// Derive a format from extension-like tokens embedded in a title.
    pub fn extract_format(title: &str, category_is_ebook_ish: bool) -> BookFormat {
        let lower = title.to_ascii_lowercase();
        for format in BookFormat::ALL {
            let token = format.to_string();
            if lower
                .split(|c: char| !c.is_ascii_alphanumeric())
                .any(|tok| tok == token)
            {
                return *format;
            }
        }
        if category_is_ebook_ish {
            BookFormat::Epub
        } else {
            BookFormat::Unknown
        }
    }

    /// Seed quality score from seeder tier and size sanity, per §4.B.
    pub fn seed_quality_score(seeders: Option<u32>, size_mb: Option<f64>) -> u8 {
        let mut score: i32 = 50;
        if let Some(s) = seeders {
            score += if s > 10 {
                30
            } else if s > 5 {
                20
            } else if s > 0 {
                10
            } else {
                0
            };
        }
        if let Some(mb) = size_mb {
            if mb >= 1.0 && mb <= 50.0 {
                score += 20;
            } else if mb > 50.0 && mb <= 100.0 {
                score += 10;
            } else if mb > 100.0 {
                score -= 10;
            }
        }
        score.clamp(0, 100) as u8
    }

    /// Seed relevance as the fraction of query tokens present in the title.
    pub fn seed_relevance_score(query: &str, title: &str) -> f64 {
        let query_tokens: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_ascii_lowercase())
            .collect();
        if query_tokens.is_empty() {
            return 0.0;
        }
        let title_lower = title.to_ascii_lowercase();
        let matched = query_tokens
            .iter()
            .filter(|tok| title_lower.contains(tok.as_str()))
            .count();
        matched as f64 / query_tokens.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::postprocess::*;
    use crate::models::BookFormat;

    #[test]
    fn test_extract_format_from_title_token() {
        assert_eq!(
            extract_format("Foundation (1951) epub", false),
            BookFormat::Epub
        );
        assert_eq!(extract_format("Dune.mobi", false), BookFormat::Mobi);
    }

    #[test]
    fn test_extract_format_falls_back_to_epub_for_ebook_category() {
        assert_eq!(extract_format("Some Book", true), BookFormat::Epub);
        assert_eq!(extract_format("Some Book", false), BookFormat::Unknown);
    }

    #[test]
    fn test_seed_quality_score_bounds() {
        assert_eq!(seed_quality_score(Some(50), Some(20.0)), 100);
        assert_eq!(seed_quality_score(None, Some(150.0)), 40);
        assert_eq!(seed_quality_score(None, None), 50);
    }

    #[test]
    fn test_seed_relevance_score_fraction() {
        let score = seed_relevance_score("test book", "The Test Book of Everything");
        assert!((score - 1.0).abs() < f64::EPSILON);
        let partial = seed_relevance_score("test book", "Test Volume One");
        assert!((partial - 0.5).abs() < f64::EPSILON);
    }
}
