//! Direct-scraper / HTML adapter.
//!
//! Reuses the Cardigann-style YAML definition schema (`definition.rs`) and
//! its selector/template/filter/field-extraction machinery to translate an
//! indexer's HTML or JSON search response into canonical `SearchResult`s.
//! This is the adapter registered for `IndexerKind::Html`/`IndexerKind::Api`.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::{Client, Proxy};
use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Error;
use crate::indexer::definition::{IndexerDefinition, SearchPath};
use crate::indexer::field_extractor::{extract_html_fields, extract_json_fields};
use crate::indexer::filters::apply_filters_with_context;
use crate::indexer::result_builder::{make_absolute_url, make_search_result};
use crate::indexer::selector::{apply_selector_chain, parse_selector_chain};
use crate::indexer::template::{render_template, TemplateContext};
use crate::indexer::traits::Adapter;
use crate::models::{IndexerKind, IndexerSearchStat, SearchRequest, SearchResponse, SearchResult};

pub struct HtmlAdapter {
    indexer_id: Uuid,
    definition: IndexerDefinition,
    client: Client,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    settings: HashMap<String, String>,
}

impl HtmlAdapter {
    pub fn new(
        indexer_id: Uuid,
        definition: IndexerDefinition,
        proxy_url: Option<&str>,
        settings: HashMap<String, String>,
        rate_limit_requests: u32,
        rate_limit_window_secs: u32,
    ) -> Result<Self, Error> {
        let mut builder = Client::builder()
            .user_agent("foliofox/0.1")
            .cookie_store(true)
            .timeout(Duration::from_secs(30));
        if let Some(url) = proxy_url {
            let proxy =
                Proxy::all(url).map_err(|e| Error::Config(format!("invalid proxy url: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;

        let window = rate_limit_window_secs.max(1) as f64;
        let requests = rate_limit_requests.max(1) as f64;
        let period = Duration::from_secs_f64((window / requests).max(0.001));
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::new(1).unwrap()))
            .allow_burst(NonZeroU32::new(rate_limit_requests.max(1)).unwrap());

        Ok(Self {
            indexer_id,
            definition,
            client,
            limiter: Arc::new(RateLimiter::direct(quota)),
            settings,
        })
    }

    fn base_url(&self) -> Result<&str, Error> {
        self.definition
            .base_url()
            .ok_or_else(|| Error::Config(format!("{} has no base url", self.definition.name)))
    }

    async fn throttled_send(
        &self,
        builder: reqwest::RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, Error> {
        tokio::select! {
            _ = self.limiter.until_ready() => {},
            _ = cancel.cancelled() => return Err(Error::Timeout),
        }
        tokio::select! {
            res = builder.send() => res.map_err(|e| Error::Transport(e.to_string())),
            _ = cancel.cancelled() => Err(Error::Timeout),
        }
    }

    fn build_context(&self, request: &SearchRequest) -> TemplateContext {
        let mut config = self.definition.get_default_config();
        for (k, v) in &self.settings {
            config.insert(k.clone(), v.clone());
        }
        let mut ctx = TemplateContext::from_search(request).with_config(config);
        if !self.definition.search.preprocessingfilters.is_empty() {
            let filtered = apply_filters_with_context(
                &ctx.query.keywords,
                &self.definition.search.preprocessingfilters,
                &ctx,
            );
            ctx.query.query = urlencoding::encode(&filtered).to_string();
            ctx.query.keywords = filtered;
        }
        ctx
    }

    fn matching_paths(&self) -> Vec<&SearchPath> {
        if self.definition.search.paths.is_empty() {
            Vec::new()
        } else {
            self.definition.search.paths.iter().collect()
        }
    }

    fn build_request_for_path(
        &self,
        search_path: &SearchPath,
        ctx: &TemplateContext,
        base_url: &str,
    ) -> (String, HashMap<String, String>, bool) {
        let method = search_path
            .method
            .as_ref()
            .unwrap_or(&self.definition.search.method);
        let is_post = method.eq_ignore_ascii_case("post");

        let rendered_path = render_template(&search_path.path, ctx);
        let url = if rendered_path.starts_with("http://") || rendered_path.starts_with("https://")
        {
            rendered_path
        } else {
            let mut u = base_url.trim_end_matches('/').to_string();
            if !rendered_path.starts_with('/') && !rendered_path.starts_with('?') {
                u.push('/');
            }
            u.push_str(&rendered_path);
            u
        };

        let mut all_inputs = if search_path.inheritinputs {
            self.definition.search.inputs.clone()
        } else {
            HashMap::new()
        };
        for (k, v) in &search_path.inputs {
            all_inputs.insert(k.clone(), v.clone());
        }

        let mut rendered_inputs = HashMap::new();
        for (k, v) in &all_inputs {
            let rendered = render_template(v, ctx);
            if !rendered.is_empty() {
                rendered_inputs.insert(k.clone(), rendered);
            }
        }

        if is_post {
            (url, rendered_inputs, true)
        } else {
            let mut final_url = url;
            if !rendered_inputs.is_empty() {
                let sep = if final_url.contains('?') { '&' } else { '?' };
                final_url.push(sep);
                let params: Vec<String> = rendered_inputs
                    .iter()
                    .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
                    .collect();
                final_url.push_str(&params.join("&"));
            }
            (final_url, HashMap::new(), false)
        }
    }

    async fn execute_path(
        &self,
        search_path: &SearchPath,
        ctx: &TemplateContext,
        base_url: &str,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResult>, Error> {
        let is_json = search_path
            .response
            .as_ref()
            .map(|r| r.response_type == "json")
            .unwrap_or(false);

        let (search_url, form_data, is_post) = self.build_request_for_path(search_path, ctx, base_url);

        let mut builder = if is_post {
            self.client.post(&search_url)
        } else {
            self.client.get(&search_url)
        };
        builder = builder.header(
            "Accept",
            if is_json {
                "application/json"
            } else {
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"
            },
        );
        for (key, values) in &self.definition.search.headers {
            for value in values {
                let rendered = render_template(value, ctx);
                if !rendered.is_empty() {
                    builder = builder.header(key.as_str(), rendered);
                }
            }
        }
        if is_post && !form_data.is_empty() {
            builder = builder.form(&form_data);
        }

        let response = self.throttled_send(builder, cancel).await?;
        if !response.status().is_success() {
            return Err(Error::HTTPStatus(response.status().as_u16()));
        }
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if !self.definition.search.error.is_empty() {
            let document = Html::parse_document(&body);
            for error_sel in &self.definition.search.error {
                if let Ok(selector) = Selector::parse(&error_sel.selector)
                    && let Some(element) = document.select(&selector).next()
                {
                    let message = element.text().collect::<String>().trim().to_string();
                    if !message.is_empty() {
                        return Err(Error::MalformedResponse(message));
                    }
                }
            }
        }

        if is_json {
            self.parse_json_results(&body, base_url, ctx, query)
        } else {
            self.parse_html_results(&body, &search_url, ctx, query)
        }
    }

    fn parse_html_results(
        &self,
        html: &str,
        base_url: &str,
        base_ctx: &TemplateContext,
        query: &str,
    ) -> Result<Vec<SearchResult>, Error> {
        let document = Html::parse_document(html);
        let mut results = Vec::new();
        let row_selector_str = render_template(&self.definition.search.rows.selector, base_ctx);

        let mut all_rows = Vec::new();
        for part in row_selector_str.split(',') {
            let chain = parse_selector_chain(part);
            if chain.is_empty() {
                continue;
            }
            let roots: Vec<scraper::ElementRef> = vec![document.root_element()];
            all_rows.extend(apply_selector_chain(roots, &chain));
        }

        for row in &all_rows {
            let mut ctx = base_ctx.clone();
            extract_html_fields(row, &self.definition.search.fields, &mut ctx);
            if let Some(result) =
                make_search_result(&self.definition, self.indexer_id, query, &ctx, base_url)
            {
                results.push(result);
            }
        }

        Ok(results)
    }

    fn parse_json_results(
        &self,
        json_str: &str,
        base_url: &str,
        base_ctx: &TemplateContext,
        query: &str,
    ) -> Result<Vec<SearchResult>, Error> {
        let mut results = Vec::new();
        let json: serde_json::Value =
            serde_json::from_str(json_str).map_err(|e| Error::MalformedResponse(e.to_string()))?;

        let row_selector = &self.definition.search.rows.selector;
        let items = match Self::json_path(&json, row_selector) {
            Some(serde_json::Value::Array(arr)) => arr,
            _ => match json.as_array() {
                Some(arr) => arr.clone(),
                None => return Ok(results),
            },
        };

        if items.len() == 1
            && let Some(id) = items[0].get("id").and_then(|v| v.as_str())
            && id == "0"
        {
            return Ok(results);
        }

        let attribute = self.definition.search.rows.attribute.as_ref();
        for item in &items {
            if let Some(attr) = attribute {
                if let Some(sub_items) = item.get(attr).and_then(|v| v.as_array()) {
                    for sub_item in sub_items {
                        if let Some(result) =
                            self.parse_json_item(sub_item, Some(item), base_url, base_ctx, query)
                        {
                            results.push(result);
                        }
                    }
                }
            } else if let Some(result) =
                self.parse_json_item(item, None, base_url, base_ctx, query)
            {
                results.push(result);
            }
        }

        Ok(results)
    }

    fn json_path(json: &serde_json::Value, path: &str) -> Option<serde_json::Value> {
        let path = path.trim();
        if path == "$" || path.is_empty() {
            return Some(json.clone());
        }
        let mut current = json;
        for part in path.split('.') {
            if part.is_empty() || part == "$" {
                continue;
            }
            current = current.get(part)?;
        }
        Some(current.clone())
    }

    fn parse_json_item(
        &self,
        item: &serde_json::Value,
        parent: Option<&serde_json::Value>,
        base_url: &str,
        base_ctx: &TemplateContext,
        query: &str,
    ) -> Option<SearchResult> {
        let mut ctx = base_ctx.clone();
        extract_json_fields(item, parent, &self.definition.search.fields, &mut ctx);
        make_search_result(&self.definition, self.indexer_id, query, &ctx, base_url)
    }
}

#[async_trait]
impl Adapter for HtmlAdapter {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn kind(&self) -> IndexerKind {
        IndexerKind::Html
    }

    async fn search(
        &self,
        request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse, Error> {
        let started = Instant::now();
        let base_url = self.base_url()?.to_string();
        let ctx = self.build_context(request);

        let paths = self.matching_paths();
        if paths.is_empty() {
            return Err(Error::Config(format!(
                "{} has no configured search path",
                self.definition.name
            )));
        }

        let mut all_results = Vec::new();
        let mut last_error = None;
        for path in &paths {
            match self
                .execute_path(path, &ctx, &base_url, &request.query, cancel)
                .await
            {
                Ok(mut results) => all_results.append(&mut results),
                Err(e) => last_error = Some(e),
            }
        }

        if all_results.is_empty()
            && let Some(err) = last_error
        {
            return Err(err);
        }

        let stat = IndexerSearchStat {
            indexer_id: self.indexer_id,
            indexer_name: self.definition.name.clone(),
            result_count: all_results.len(),
            response_time_ms: started.elapsed().as_millis() as u64,
            error: None,
        };

        Ok(SearchResponse {
            query: request.query.clone(),
            total_results: all_results.len(),
            results: all_results,
            indexers_searched: vec![stat],
            search_duration_ms: started.elapsed().as_millis() as u64,
            cached: false,
            cache_expires_at: None,
        })
    }
}

/// Helper exported for the RSS adapter, which reuses URL joining but not the
/// rest of the scraping machinery.
pub fn absolute_url(url: &str, base_url: &str) -> String {
    make_absolute_url(url, base_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::definition::{Fields as DefFields, RowSelector as DefRowSelector, Search};
    use std::collections::HashMap as Map;

    fn stub_definition() -> IndexerDefinition {
        IndexerDefinition {
            id: "test".to_string(),
            name: "Test Indexer".to_string(),
            description: String::new(),
            language: "en".to_string(),
            indexer_type: "public".to_string(),
            encoding: "utf-8".to_string(),
            followredirect: false,
            request_delay: None,
            links: vec!["http://example.com".to_string()],
            legacylinks: Vec::new(),
            caps: Default::default(),
            login: None,
            settings: Vec::new(),
            search: Search {
                paths: vec![SearchPath {
                    path: "search".to_string(),
                    method: None,
                    followredirect: None,
                    response: None,
                    categories: Vec::new(),
                    inputs: Map::new(),
                    inheritinputs: true,
                }],
                path: None,
                method: "get".to_string(),
                headers: Map::new(),
                inputs: {
                    let mut m = Map::new();
                    m.insert("q".to_string(), "{{ .Keywords }}".to_string());
                    m
                },
                keywordsfilters: Vec::new(),
                error: Vec::new(),
                preprocessingfilters: Vec::new(),
                rows: DefRowSelector {
                    selector: String::new(),
                    ..Default::default()
                },
                fields: DefFields::default(),
            },
            download: None,
        }
    }

    #[test]
    fn test_build_request_for_path_get() {
        let adapter = HtmlAdapter::new(
            Uuid::new_v4(),
            stub_definition(),
            None,
            HashMap::new(),
            1,
            1,
        )
        .unwrap();
        let mut ctx = TemplateContext::default();
        ctx.query.keywords = "dune".to_string();
        let path = &adapter.definition.search.paths[0];
        let (url, inputs, is_post) = adapter.build_request_for_path(path, &ctx, "http://example.com");
        assert!(!is_post);
        assert!(url.contains("search?"));
        assert!(inputs.is_empty());
    }

    #[test]
    fn test_build_request_for_path_post() {
        let mut definition = stub_definition();
        definition.search.method = "post".to_string();
        let adapter =
            HtmlAdapter::new(Uuid::new_v4(), definition, None, HashMap::new(), 1, 1).unwrap();
        let mut ctx = TemplateContext::default();
        ctx.query.keywords = "dune".to_string();
        let path = &adapter.definition.search.paths[0];
        let (url, inputs, is_post) = adapter.build_request_for_path(path, &ctx, "http://example.com");
        assert!(is_post);
        assert_eq!(url, "http://example.com/search");
        assert_eq!(inputs.get("q").unwrap(), "dune");
    }
}
