//! Result builder - constructs a canonical `SearchResult` from extracted
//! fields collected by the HTML/direct-scraper adapter (stored in a
//! `TemplateContext`).

use chrono::Utc;
use uuid::Uuid;

use super::definition::IndexerDefinition;
use super::filters::parse_size;
use super::template::TemplateContext;
use crate::indexer::traits::postprocess;
use crate::models::SearchResult;

/// Construct a `SearchResult` from a populated `TemplateContext`.
pub fn make_search_result(
    definition: &IndexerDefinition,
    indexer_id: Uuid,
    query: &str,
    ctx: &TemplateContext,
    base_url: &str,
) -> Option<SearchResult> {
    let title = ctx.result.get("title")?.clone();
    if title.is_empty() {
        return None;
    }

    let details = ctx
        .result
        .get("details")
        .map(|d| make_absolute_url(d, base_url));

    let download_url = ctx
        .result
        .get("download")
        .map(|l| make_absolute_url(l, base_url))
        .or_else(|| ctx.result.get("magnet").cloned())
        .or_else(|| details.clone())?;

    let seeders = ctx.result.get("seeders").and_then(|s| parse_numeric_field(s));
    let size_bytes = ctx.result.get("size").map(|s| parse_size(s));
    let size_mb = size_bytes.map(|b| b as f64 / (1024.0 * 1024.0));

    let category_is_ebook_ish = ctx
        .result
        .get("category")
        .map(|c| definition.category_is_ebook_ish(c))
        .unwrap_or(true);
    let format = postprocess::extract_format(&title, category_is_ebook_ish);
    let quality_score = postprocess::seed_quality_score(seeders, size_mb);
    let relevance_score = postprocess::seed_relevance_score(query, &title);

    Some(SearchResult {
        indexer_id,
        indexer_name: definition.name.clone(),
        title,
        author: None,
        description: None,
        format,
        file_size_bytes: size_bytes,
        quality_score,
        relevance_score,
        download_url,
        source_url: details,
        language: Some(definition.language.clone()),
        publication_year: ctx.result.get("date").and_then(|d| parse_year(d)),
        isbn: None,
        found_at: Utc::now(),
        metadata: Default::default(),
        seeders,
    })
}

fn parse_year(date_str: &str) -> Option<i32> {
    date_str.get(0..4).and_then(|y| y.parse().ok())
}

/// Parse a numeric field with comma handling
fn parse_numeric_field(value: &str) -> Option<u32> {
    value.replace(',', "").parse().ok()
}

/// Make a URL absolute using proper URL resolution
/// base_url is the indexer's base URL (e.g., https://nnmclub.to)
pub fn make_absolute_url(url: &str, base_url: &str) -> String {
    // Already absolute
    if url.starts_with("http://") || url.starts_with("https://") || url.starts_with("magnet:") {
        return url.to_string();
    }

    // Use url crate for proper joining if possible
    if let Ok(base) = url::Url::parse(base_url)
        && let Ok(resolved) = base.join(url)
    {
        return resolved.to_string();
    }

    // Fallback: simple concatenation
    if url.starts_with('/') {
        format!("{}{}", base_url.trim_end_matches('/'), url)
    } else {
        format!("{}/{}", base_url.trim_end_matches('/'), url)
    }
}
