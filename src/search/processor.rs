//! Result Processor (Component F, §4.F). An ordered pipeline of pure
//! functions applied to the union of adapter results — no hidden state, no
//! I/O. `process` is the single entry point the aggregator calls.

use chrono::Utc;

use crate::models::{BookFormat, SearchRequest, SearchResult};

const MERGE_SORT_PARALLEL_THRESHOLD: usize = 1000;

/// Run the full pipeline: enrich, enhance quality, filter, dedupe, rank,
/// truncate.
pub fn process(results: Vec<SearchResult>, query: &str, request: &SearchRequest) -> Vec<SearchResult> {
    let mut results = results;
    enrich_relevance(&mut results, query);
    enhance_quality(&mut results);
    let mut results = filter(results, request);
    results = dedupe(results);
    sort_by_composite_score(&mut results);
    truncate(results, request.limit)
}

/// Step 1: recompute relevance with the positional-weighted scheme.
fn enrich_relevance(results: &mut [SearchResult], query: &str) {
    let query_tokens: Vec<String> = query
        .split_whitespace()
        .map(|t| t.to_ascii_lowercase())
        .collect();
    if query_tokens.is_empty() {
        return;
    }
    let query_lower = query.to_ascii_lowercase();

    for result in results.iter_mut() {
        let title_lower = result.title.to_ascii_lowercase();
        let author_lower = result.author.as_deref().unwrap_or("").to_ascii_lowercase();

        let mut score = 0.0_f64;
        if !query_lower.is_empty() && title_lower.contains(&query_lower) {
            score += 0.5;
        }

        let n = query_tokens.len() as f64;
        for (i, token) in query_tokens.iter().enumerate() {
            if token.is_empty() {
                continue;
            }
            if title_lower.contains(token.as_str()) {
                // Earlier tokens carry higher weight; bonus decays linearly
                // across the token sequence.
                let position_bonus = 0.1 * (1.0 - (i as f64 / n));
                score += 0.2 + position_bonus;
            }
            if author_lower.contains(token.as_str()) {
                score += 0.1;
            }
        }

        score += result.quality_score as f64 / 1000.0;
        result.relevance_score = score.clamp(0.0, 1.0);
    }
}

/// Title indicators checked during quality enhancement. Disqualifiers are
/// surfaced via `is_disqualified` and dropped in the filter step.
const DISQUALIFYING_INDICATORS: &[&str] = &["sample", "cam", "virus"];

fn is_disqualified(title_lower: &str) -> bool {
    DISQUALIFYING_INDICATORS
        .iter()
        .any(|kw| title_lower.contains(kw))
}

/// Step 2: format bonus/penalty, size sanity, and title-indicator
/// adjustments, bounded to [0, 100].
fn enhance_quality(results: &mut [SearchResult]) {
    for result in results.iter_mut() {
        let mut score = result.quality_score as i32;
        score += match result.format {
            BookFormat::Epub => 13,
            BookFormat::Mobi => 12,
            BookFormat::Azw3 => 10,
            BookFormat::Pdf => 6,
            BookFormat::Txt => -12,
            _ => 0,
        };

        if let Some(bytes) = result.file_size_bytes {
            let mb = bytes as f64 / (1024.0 * 1024.0);
            if (1.0..=50.0).contains(&mb) {
                score += 10;
            } else if mb > 100.0 {
                score -= 10;
            }
        }

        let title_lower = result.title.to_ascii_lowercase();
        if title_lower.contains("retail") || title_lower.contains("original") {
            score += 18;
        }
        if title_lower.contains("scan") || title_lower.contains("ocr") {
            score -= 12;
        }

        result.quality_score = score.clamp(0, 100) as u8;
    }
}

/// Step 3: drop items violating the request's filters, or the disqualifier
/// set from step 2.
fn filter(results: Vec<SearchResult>, request: &SearchRequest) -> Vec<SearchResult> {
    results
        .into_iter()
        .filter(|r| {
            let title_lower = r.title.to_ascii_lowercase();
            if is_disqualified(&title_lower) {
                return false;
            }
            if let Some(formats) = &request.formats
                && !formats.contains(&r.format)
            {
                return false;
            }
            if let Some(languages) = &request.languages
                && let Some(lang) = &r.language
                && !languages.iter().any(|l| l.eq_ignore_ascii_case(lang))
            {
                return false;
            }
            if let Some(min_quality) = request.min_quality
                && r.quality_score < min_quality
            {
                return false;
            }
            if let Some(max_size_mb) = request.max_size_mb
                && let Some(bytes) = r.file_size_bytes
                && bytes > max_size_mb * 1024 * 1024
            {
                return false;
            }
            true
        })
        .collect()
}

/// Step 4: dedupe on normalize(title) + '|' + format; first occurrence wins.
pub fn normalize_title(title: &str) -> String {
    let replaced: String = title
        .to_ascii_lowercase()
        .chars()
        .map(|c| if matches!(c, '.' | '_' | '-') { ' ' } else { c })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn dedupe(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(results.len());
    for result in results {
        let key = format!("{}|{}", normalize_title(&result.title), result.format);
        if seen.insert(key) {
            out.push(result);
        }
    }
    out
}

fn freshness(result: &SearchResult) -> f64 {
    let age_hours = (Utc::now() - result.found_at).num_seconds().max(0) as f64 / 3600.0;
    (1.0 / (1.0 + age_hours / 24.0)).clamp(0.0, 1.0)
}

fn popularity(result: &SearchResult) -> f64 {
    result
        .seeders
        .map(|s| (s as f64 / 50.0).min(1.0))
        .unwrap_or(0.0)
}

fn composite_score(result: &SearchResult) -> f64 {
    0.4 * result.relevance_score
        + 0.3 * (result.quality_score as f64 / 100.0)
        + 0.1 * freshness(result)
        + 0.2 * popularity(result)
}

/// Tuple of sort keys: composite score, quality, size-sanity preference —
/// all descending (via `Reverse` at the call site) except the final stable
/// tie-break, which keeps arrival order.
fn size_preference(result: &SearchResult) -> u8 {
    match result.file_size_bytes {
        Some(bytes) if (1..=50 * 1024 * 1024).contains(&bytes) => 1,
        _ => 0,
    }
}

/// Step 5: rank by composite score, descending, with tie-breaks on
/// quality_score then reasonable-size preference then stable arrival order.
/// Uses a divide-and-conquer merge sort with parallel halves once the set
/// exceeds 1,000 items (§4.F step 5).
fn sort_by_composite_score(results: &mut Vec<SearchResult>) {
    if results.len() <= 1 {
        return;
    }
    let scored: Vec<(f64, u8, u8, usize, SearchResult)> = results
        .drain(..)
        .enumerate()
        .map(|(i, r)| (composite_score(&r), r.quality_score, size_preference(&r), i, r))
        .collect();
    let sorted = merge_sort(scored);
    *results = sorted.into_iter().map(|t| t.4).collect();
}

type ScoredItem = (f64, u8, u8, usize, SearchResult);

fn rank_cmp(a: &ScoredItem, b: &ScoredItem) -> std::cmp::Ordering {
    b.0.partial_cmp(&a.0)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| b.1.cmp(&a.1))
        .then_with(|| b.2.cmp(&a.2))
        .then_with(|| a.3.cmp(&b.3))
}

fn merge_sort(mut items: Vec<ScoredItem>) -> Vec<ScoredItem> {
    if items.len() <= 1 {
        return items;
    }
    if items.len() > MERGE_SORT_PARALLEL_THRESHOLD {
        let mid = items.len() / 2;
        let right = items.split_off(mid);
        let left = items;
        let (sorted_left, sorted_right) = std::thread::scope(|scope| {
            let right_handle = scope.spawn(|| merge_sort(right));
            let sorted_left = merge_sort(left);
            (sorted_left, right_handle.join().expect("merge sort thread panicked"))
        });
        return merge(sorted_left, sorted_right);
    }
    items.sort_by(rank_cmp);
    items
}

fn merge(left: Vec<ScoredItem>, right: Vec<ScoredItem>) -> Vec<ScoredItem> {
    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left_iter = left.into_iter().peekable();
    let mut right_iter = right.into_iter().peekable();
    loop {
        match (left_iter.peek(), right_iter.peek()) {
            (Some(l), Some(r)) => {
                if rank_cmp(l, r) != std::cmp::Ordering::Greater {
                    out.push(left_iter.next().unwrap());
                } else {
                    out.push(right_iter.next().unwrap());
                }
            }
            (Some(_), None) => out.push(left_iter.next().unwrap()),
            (None, Some(_)) => out.push(right_iter.next().unwrap()),
            (None, None) => break,
        }
    }
    out
}

/// Step 6: apply the request's limit, if any.
fn truncate(mut results: Vec<SearchResult>, limit: Option<usize>) -> Vec<SearchResult> {
    if let Some(limit) = limit {
        results.truncate(limit);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample(title: &str, quality: u8, format: BookFormat, size_mb: Option<u64>) -> SearchResult {
        SearchResult {
            indexer_id: Uuid::new_v4(),
            indexer_name: "idx".into(),
            title: title.into(),
            author: None,
            description: None,
            format,
            file_size_bytes: size_mb.map(|mb| mb * 1024 * 1024),
            quality_score: quality,
            relevance_score: 0.0,
            download_url: "http://x".into(),
            source_url: None,
            language: None,
            publication_year: None,
            isbn: None,
            found_at: Utc::now(),
            metadata: Default::default(),
            seeders: None,
        }
    }

    #[test]
    fn test_dedup_keys_on_normalized_title_and_format() {
        let a = sample("Foundation.epub", 60, BookFormat::Epub, Some(2));
        let mut b = sample("foundation_epub", 50, BookFormat::Epub, Some(2));
        b.indexer_name = "other".into();
        let request = SearchRequest::new("foundation");
        let out = process(vec![a, b], "foundation", &request);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].indexer_name, "idx");
    }

    #[test]
    fn test_ranking_prefers_relevance_over_raw_quality() {
        let test_book = sample("Test Book", 80, BookFormat::Epub, Some(3));
        let different_book = sample("Different Book", 90, BookFormat::Pdf, Some(4));
        let request = SearchRequest::new("test book");
        let out = process(vec![different_book, test_book], "test book", &request);
        assert_eq!(out[0].title, "Test Book");
    }

    #[test]
    fn test_disqualifying_indicator_drops_result() {
        let sample_bad = sample("Some Sample Book", 90, BookFormat::Epub, Some(2));
        let request = SearchRequest::new("book");
        let out = process(vec![sample_bad], "book", &request);
        assert!(out.is_empty());
    }

    #[test]
    fn test_min_quality_filters_out_low_scores() {
        let low = sample("Low Quality Book", 10, BookFormat::Txt, Some(2));
        let mut request = SearchRequest::new("book");
        request.min_quality = Some(50);
        let out = process(vec![low], "book", &request);
        assert!(out.is_empty());
    }

    #[test]
    fn test_limit_truncates_results() {
        let items: Vec<SearchResult> = (0..5)
            .map(|i| sample(&format!("Book {i}"), 50, BookFormat::Epub, Some(2)))
            .collect();
        let mut request = SearchRequest::new("book");
        request.limit = Some(2);
        let out = process(items, "book", &request);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_large_result_set_remains_sorted_descending() {
        let items: Vec<SearchResult> = (0..1500)
            .map(|i| sample(&format!("Book Unique {i}"), (i % 100) as u8, BookFormat::Epub, Some(2)))
            .collect();
        let request = SearchRequest::new("book");
        let out = process(items, "book", &request);
        for pair in out.windows(2) {
            let a = composite_score(&pair[0]);
            let b = composite_score(&pair[1]);
            assert!(a >= b - f64::EPSILON);
        }
    }
}
