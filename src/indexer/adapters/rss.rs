//! Generic RSS adapter, for indexers that expose a plain book-release feed
//! with no Torznab attribute extension — title, link and pubDate only.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Datelike};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Error;
use crate::indexer::adapters::html::absolute_url;
use crate::indexer::client::IndexerClient;
use crate::indexer::traits::{postprocess, Adapter};
use crate::models::{
    Indexer, IndexerKind, IndexerSearchStat, SearchRequest, SearchResponse, SearchResult,
};

pub struct RssAdapter {
    indexer_id: Uuid,
    name: String,
    base_url: String,
    feed_path: String,
    client: IndexerClient,
}

impl RssAdapter {
    pub fn new(indexer: &Indexer, api_key: Option<&str>) -> Self {
        Self {
            indexer_id: indexer.id,
            name: indexer.name.clone(),
            base_url: indexer.base_url.trim_end_matches('/').to_string(),
            feed_path: indexer
                .api_path
                .clone()
                .unwrap_or_else(|| "/rss".to_string()),
            client: IndexerClient::new(indexer, api_key),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, self.feed_path)
    }
}

#[async_trait]
impl Adapter for RssAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> IndexerKind {
        IndexerKind::Rss
    }

    async fn search(
        &self,
        request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse, Error> {
        let started = Instant::now();
        let query = [("q", request.query.clone())];
        let body = self
            .client
            .request(&self.endpoint(), &query, cancel)
            .await?;

        let all = parse_rss_feed(&body, self.indexer_id, &self.name, &self.base_url)?;
        let results: Vec<SearchResult> = all
            .into_iter()
            .map(|mut r| {
                r.relevance_score = postprocess::seed_relevance_score(&request.query, &r.title);
                r
            })
            .filter(|r| request.query.trim().is_empty() || r.relevance_score > 0.0)
            .collect();

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
    pub_date: Option<String>,
    enclosure_url: Option<String>,
    enclosure_length: Option<u64>,
}

impl RawItem {
    fn into_result(self, indexer_id: Uuid, indexer_name: &str, base_url: &str) -> Option<SearchResult> {
        let title = self.title?;
        if title.is_empty() {
            return None;
        }
        let link = self.link.map(|l| absolute_url(&l, base_url));
        let download_url = self
            .enclosure_url
            .map(|u| absolute_url(&u, base_url))
            .or_else(|| link.clone())?;

        let size_mb = self
            .enclosure_length
            .map(|b| b as f64 / (1024.0 * 1024.0));
        let format = postprocess::extract_format(&title, true);
        let quality_score = postprocess::seed_quality_score(None, size_mb);
        let publication_year = self
            .pub_date
            .as_deref()
            .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
            .map(|d| d.year());

        Some(SearchResult {
            indexer_id,
            indexer_name: indexer_name.to_string(),
            title,
            author: None,
            description: None,
            format,
            file_size_bytes: self.enclosure_length,
            quality_score,
            relevance_score: 0.0,
            download_url,
            source_url: link,
            language: None,
            publication_year,
            isbn: None,
            found_at: chrono::Utc::now(),
            metadata: Default::default(),
            seeders: None,
        })
    }
}

fn parse_rss_feed(
    body: &str,
    indexer_id: Uuid,
    indexer_name: &str,
    base_url: &str,
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
                            && let Some(result) = item.into_result(indexer_id, indexer_name, base_url)
                        {
                            results.push(result);
                        }
                    }
                    "title" | "link" | "pubDate" => text_target = None,
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

    const SAMPLE_FEED: &str = r#"<rss><channel>
<item>
<title>Foundation (1951)</title>
<link>/details/1</link>
<pubDate>Mon, 01 Jan 2024 00:00:00 +0000</pubDate>
<enclosure url="/download/1" length="2097152"/>
</item>
</channel></rss>"#;

    #[test]
    fn test_parse_rss_feed_resolves_relative_links() {
        let results =
            parse_rss_feed(SAMPLE_FEED, Uuid::new_v4(), "MyIndexer", "http://example.com").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].download_url, "http://example.com/download/1");
        assert_eq!(results[0].file_size_bytes, Some(2_097_152));
        assert_eq!(results[0].indexer_name, "MyIndexer");
    }
}
