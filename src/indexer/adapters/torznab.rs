//! Torznab/Newznab adapter.
//!
//! Torznab (torrent indexers) and Newznab (usenet indexers) share one wire
//! format — an RSS 2.0 feed carrying `<torznab:attr name="..." value="..."/>`
//! children per item — so Jackett and Prowlarr both speak it as their
//! aggregation protocol, and one adapter covers all four labels in the
//! component table.

use std::time::Instant;

use async_trait::async_trait;
use chrono::DateTime;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Error;
use crate::indexer::client::IndexerClient;
use crate::indexer::traits::{postprocess, Adapter};
use crate::models::{
    Indexer, IndexerKind, IndexerSearchStat, SearchRequest, SearchResponse, SearchResult,
};

/// Torznab category family reserved for books (standard Newznab/Torznab
/// category tree, `7000`-`7999`).
const BOOKS_CATEGORY: &str = "7000";

pub struct TorznabAdapter {
    indexer_id: Uuid,
    name: String,
    kind: IndexerKind,
    base_url: String,
    api_path: String,
    client: IndexerClient,
}

impl TorznabAdapter {
    pub fn new(indexer: &Indexer, api_key: Option<&str>) -> Self {
        Self {
            indexer_id: indexer.id,
            name: indexer.name.clone(),
            kind: indexer.kind,
            base_url: indexer.base_url.trim_end_matches('/').to_string(),
            api_path: indexer
                .api_path
                .clone()
                .unwrap_or_else(|| "/api".to_string()),
            client: IndexerClient::new(indexer, api_key),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, self.api_path)
    }
}

#[async_trait]
impl Adapter for TorznabAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> IndexerKind {
        self.kind
    }

    async fn search(
        &self,
        request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse, Error> {
        let started = Instant::now();
        let limit = request.limit.unwrap_or(100).to_string();
        let query = [
            ("t", "search".to_string()),
            ("q", request.query.clone()),
            ("cat", BOOKS_CATEGORY.to_string()),
            ("limit", limit),
            ("extended", "1".to_string()),
        ];

        let body = self
            .client
            .request(&self.endpoint(), &query, cancel)
            .await?;

        let results = parse_torznab_feed(&body, self.indexer_id, &self.name, &request.query)?;

        let stat = IndexerSearchStat {
            indexer_id: self.indexer_id,
            indexer_name: self.name.clone(),
            result_count: results.len(),
            response_time_ms: IndexerClient::elapsed_ms(started),
            error: None,
        };

        Ok(SearchResponse {
            query: request.query.clone(),
            total_results: results.len(),
            results,
            indexers_searched: vec![stat],
            search_duration_ms: IndexerClient::elapsed_ms(started),
            cached: false,
            cache_expires_at: None,
        })
    }
}

#[derive(Default)]
struct RawItem {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    pub_date: Option<String>,
    enclosure_url: Option<String>,
    enclosure_length: Option<u64>,
    attrs: Vec<(String, String)>,
}

impl RawItem {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn into_result(self, indexer_id: Uuid, indexer_name: &str, query: &str) -> Option<SearchResult> {
        let title = self.title?;
        if title.is_empty() {
            return None;
        }

        let download_url = self
            .enclosure_url
            .or(self.link.clone())
            .or(self.guid.clone())?;

        let seeders: Option<u32> = self.attr("seeders").and_then(|s| s.parse().ok());
        let size_bytes: Option<u64> = self
            .attr("size")
            .and_then(|s| s.parse().ok())
            .or(self.enclosure_length);
        let size_mb = size_bytes.map(|b| b as f64 / (1024.0 * 1024.0));

        let category_is_ebook_ish = self
            .attr("category")
            .map(|c| c.starts_with(BOOKS_CATEGORY))
            .unwrap_or(true);

        let format = postprocess::extract_format(&title, category_is_ebook_ish);
        let quality_score = postprocess::seed_quality_score(seeders, size_mb);
        let relevance_score = postprocess::seed_relevance_score(query, &title);

        let publication_year = self
            .pub_date
            .as_deref()
            .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
            .map(|d| d.year());

        Some(SearchResult {
            indexer_id,
            indexer_name: indexer_name.to_string(),
            title,
            author: self.attr("author").map(|s| s.to_string()),
            description: None,
            format,
            file_size_bytes: size_bytes,
            quality_score,
            relevance_score,
            download_url,
            source_url: self.link,
            language: self.attr("language").map(|s| s.to_string()),
            publication_year,
            isbn: self
                .attr("isbn")
                .or_else(|| self.attr("ebookisbn"))
                .map(|s| s.to_string()),
            found_at: chrono::Utc::now(),
            metadata: Default::default(),
            seeders,
        })
    }
}

use chrono::Datelike;

/// Parse a Torznab/Newznab RSS feed into canonical results. Indexer-local;
/// malformed XML becomes `Error::MalformedResponse` rather than aborting the
/// whole fan-out (the aggregator treats it as this indexer's result).
fn parse_torznab_feed(
    body: &str,
    indexer_id: Uuid,
    indexer_name: &str,
    query: &str,
) -> Result<Vec<SearchResult>, Error> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut results = Vec::new();
    let mut current: Option<RawItem> = None;
    let mut text_target: Option<&'static str> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let local = local_name(e.name().as_ref());
                match local.as_str() {
                    "item" => current = Some(RawItem::default()),
                    "title" => text_target = Some("title"),
                    "link" => text_target = Some("link"),
                    "guid" => text_target = Some("guid"),
                    "pubDate" => text_target = Some("pubDate"),
                    "enclosure" => {
                        if let Some(item) = current.as_mut() {
                            for attr in e.attributes().flatten() {
                                let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                                let value = attr
                                    .decode_and_unescape_value(reader.decoder())
                                    .unwrap_or_default()
                                    .to_string();
                                match key.as_str() {
                                    "url" => item.enclosure_url = Some(value),
                                    "length" => item.enclosure_length = value.parse().ok(),
                                    _ => {}
                                }
                            }
                        }
                    }
                    "attr" => {
                        if let Some(item) = current.as_mut() {
                            let mut name = None;
                            let mut value = None;
                            for attr in e.attributes().flatten() {
                                let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                                let val = attr
                                    .decode_and_unescape_value(reader.decoder())
                                    .unwrap_or_default()
                                    .to_string();
                                match key.as_str() {
                                    "name" => name = Some(val),
                                    "value" => value = Some(val),
                                    _ => {}
                                }
                            }
                            if let (Some(n), Some(v)) = (name, value) {
                                item.attrs.push((n, v));
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if let (Some(target), Some(item)) = (text_target, current.as_mut()) {
                    let text = e
                        .unescape()
                        .unwrap_or(std::borrow::Cow::Borrowed(""))
                        .to_string();
                    match target {
                        "title" => item.title = Some(text),
                        "link" => item.link = Some(text),
                        "guid" => item.guid = Some(text),
                        "pubDate" => item.pub_date = Some(text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                let local = local_name(e.name().as_ref());
                match local.as_str() {
                    "item" => {
                        if let Some(item) = current.take()
                            && let Some(result) = item.into_result(indexer_id, indexer_name, query)
                        {
                            results.push(result);
                        }
                    }
                    "title" | "link" | "guid" | "pubDate" => text_target = None,
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::MalformedResponse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(results)
}

fn local_name(full: &[u8]) -> String {
    let s = String::from_utf8_lossy(full);
    match s.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:torznab="http://torznab.com/schemas/2015/feed">
<channel>
<item>
<title>Dune (1965) epub</title>
<guid>http://example.com/item/1</guid>
<link>http://example.com/details/1</link>
<pubDate>Mon, 01 Jan 2024 00:00:00 +0000</pubDate>
<enclosure url="http://example.com/download/1" length="1048576" type="application/x-bittorrent"/>
<torznab:attr name="seeders" value="12"/>
<torznab:attr name="size" value="1048576"/>
<torznab:attr name="category" value="7020"/>
</item>
</channel>
</rss>"#;

    #[test]
    fn test_parse_torznab_feed_extracts_item() {
        let id = Uuid::new_v4();
        let results = parse_torznab_feed(SAMPLE_FEED, id, "MyIndexer", "dune").unwrap();
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.title, "Dune (1965) epub");
        assert_eq!(r.download_url, "http://example.com/download/1");
        assert_eq!(r.seeders, Some(12));
        assert_eq!(r.file_size_bytes, Some(1_048_576));
        assert_eq!(r.publication_year, Some(2024));
        assert_eq!(r.indexer_name, "MyIndexer");
    }

    #[test]
    fn test_parse_empty_feed_returns_no_results() {
        let feed = r#"<rss><channel></channel></rss>"#;
        let results = parse_torznab_feed(feed, Uuid::new_v4(), "MyIndexer", "q").unwrap();
        assert!(results.is_empty());
    }
}
