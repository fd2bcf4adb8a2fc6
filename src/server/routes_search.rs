//! `GET /api/v1/search`, `GET /api/v1/search/suggestions` (§6).

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{BookFormat, SearchRequest, SearchResponse};
use crate::repository::SearchHistoryRepository;
use crate::server::AppState;

fn current_user_id(headers: &axum::http::HeaderMap) -> Uuid {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .unwrap_or_else(Uuid::nil)
}

#[derive(Debug, Deserialize)]
pub struct SearchQueryParams {
    pub q: String,
    #[serde(default)]
    pub formats: Option<String>,
    #[serde(default)]
    pub languages: Option<String>,
    #[serde(default)]
    pub min_quality: Option<u8>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub timeout_s: Option<u64>,
    #[serde(default)]
    pub use_cache: Option<bool>,
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

impl From<SearchQueryParams> for SearchRequest {
    fn from(params: SearchQueryParams) -> Self {
        let mut request = SearchRequest::new(params.q);
        if let Some(formats) = params.formats {
            request.formats = Some(
                split_csv(&formats)
                    .iter()
                    .filter_map(|f| BookFormat::from_token(f))
                    .collect(),
            );
        }
        if let Some(languages) = params.languages {
            request.languages = Some(split_csv(&languages));
        }
        request.min_quality = params.min_quality;
        request.max_size_mb = params.max_size_mb;
        request.limit = params.limit;
        if let Some(timeout_s) = params.timeout_s {
            request.timeout_s = timeout_s;
        }
        if let Some(use_cache) = params.use_cache {
            request.use_cache = use_cache;
        }
        request
    }
}

pub async fn search(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Query(params): Query<SearchQueryParams>,
) -> Result<Json<SearchResponse>> {
    let user_id = current_user_id(&headers);
    let request: SearchRequest = params.into();
    let started = std::time::Instant::now();
    // A fresh token per request; nothing cancels it externally yet (axum
    // gives no direct disconnect signal here), but it satisfies the
    // aggregator's cancellation contract and gives a future disconnect- or
    // admin-triggered cancel a hook to call `.cancel()` on.
    let cancel = CancellationToken::new();
    let response = state
        .aggregator
        .search(user_id, request.clone(), &cancel)
        .await?;
    state
        .metrics
        .record("search.aggregate", started.elapsed(), true)
        .await;
    state.events.publish(crate::events::Event::SearchCompleted {
        user_id,
        query: request.query,
        results_count: response.total_results,
        search_duration_ms: response.search_duration_ms,
    });
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
pub struct Suggestion {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: SuggestionType,
    pub count: u32,
    pub relevance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionType {
    Title,
    Author,
    Series,
    Genre,
    All,
}

impl Default for SuggestionType {
    fn default() -> Self {
        Self::All
    }
}

#[derive(Debug, Deserialize)]
pub struct SuggestQueryParams {
    pub q: String,
    #[serde(default, rename = "type")]
    pub kind: SuggestionType,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Best-effort suggestions derived from the user's own recent search
/// history — matching queries that share the prefix, ranked by how often
/// they recur (§6 "autocomplete the query box"). There is no separate
/// title/author/series/genre index to draw on, so every suggestion is
/// reported with `type: all` regardless of the requested filter; the
/// `type` query param is accepted but does not yet narrow the source.
pub async fn suggestions(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Query(params): Query<SuggestQueryParams>,
) -> Result<Json<Vec<Suggestion>>> {
    let user_id = current_user_id(&headers);
    if params.q.trim().is_empty() {
        return Err(Error::InvalidArgument("q must not be empty".into()));
    }
    let prefix = params.q.trim().to_ascii_lowercase();
    let recent = state.repos.recent_for_user(user_id, 200).await?;

    use std::collections::HashMap;
    let mut counts: HashMap<String, u32> = HashMap::new();
    for entry in &recent {
        if entry.query.to_ascii_lowercase().starts_with(&prefix) {
            *counts.entry(entry.query.clone()).or_insert(0) += 1;
        }
    }
    let max_count = counts.values().copied().max().unwrap_or(1).max(1) as f64;
    let mut suggestions: Vec<Suggestion> = counts
        .into_iter()
        .map(|(text, count)| Suggestion {
            text,
            kind: SuggestionType::All,
            relevance: count as f64 / max_count,
            count,
        })
        .collect();
    suggestions.sort_by(|a, b| b.count.cmp(&a.count));
    suggestions.truncate(params.limit.unwrap_or(10).min(50));
    Ok(Json(suggestions))
}
