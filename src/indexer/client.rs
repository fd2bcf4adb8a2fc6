//! Rate-limited HTTP client bound to a single indexer's configuration.
//!
//! One `IndexerClient` instance owns one token-bucket limiter; limiters are
//! never shared across indexers (§5 shared-resources rule (d)).

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures::StreamExt;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::Response;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::models::Indexer;

const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

/// Configuration for the retry policy layered on top of the token bucket.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            max_elapsed_time: Some(self.max_interval * (self.max_retries + 1)),
            ..Default::default()
        }
    }
}

/// A client bound to a single indexer's rate limit, timeout and identity
/// headers.
pub struct IndexerClient {
    http: reqwest::Client,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    retry: RetryPolicy,
    user_agent: String,
    auth_header: Option<(String, String)>,
}

impl IndexerClient {
    pub fn new(indexer: &Indexer, api_key: Option<&str>) -> Self {
        let window = indexer.rate_limit_window_secs.max(1) as f64;
        let requests = indexer.rate_limit_requests.max(1) as f64;
        let period = Duration::from_secs_f64((window / requests).max(0.001));
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::new(1).unwrap()))
            .allow_burst(NonZeroU32::new(indexer.rate_limit_requests.max(1)).unwrap());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(indexer.timeout_secs as u64))
            .build()
            .expect("failed to build reqwest client");

        Self {
            http,
            limiter: Arc::new(RateLimiter::direct(quota)),
            retry: RetryPolicy::default(),
            user_agent: indexer.user_agent.clone(),
            auth_header: api_key.map(|k| ("X-Api-Key".to_string(), k.to_string())),
        }
    }

    /// Wait for a rate-limit permit, honoring cancellation.
    async fn wait_for_permit(&self, cancel: &CancellationToken) -> Result<(), Error> {
        tokio::select! {
            _ = self.limiter.until_ready() => Ok(()),
            _ = cancel.cancelled() => Err(Error::Timeout),
        }
    }

    /// Perform a GET request with the configured query parameters, honoring
    /// the rate limiter, the configured timeout and cancellation, and a
    /// bounded number of retries on transient failures.
    pub async fn request(
        &self,
        path: &str,
        query: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        let mut backoff = self.retry.to_backoff();
        let mut attempt = 0u32;
        loop {
            self.wait_for_permit(cancel).await?;

            let mut builder = self.http.get(path).header("User-Agent", &self.user_agent);
            if let Some((name, value)) = &self.auth_header {
                builder = builder.header(name.as_str(), value.as_str());
            }
            builder = builder.query(query);

            let outcome = tokio::select! {
                res = builder.send() => res,
                _ = cancel.cancelled() => return Err(Error::Timeout),
            };

            match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() == 429 {
                        if attempt >= self.retry.max_retries {
                            return Err(Error::RateLimited);
                        }
                    } else if status.is_server_error() {
                        if attempt >= self.retry.max_retries {
                            return Err(Error::HTTPStatus(status.as_u16()));
                        }
                    } else if !status.is_success() {
                        return Err(Error::HTTPStatus(status.as_u16()));
                    } else {
                        return self.bounded_body(response).await;
                    }
                }
                Err(e) => {
                    if e.is_timeout() {
                        return Err(Error::Timeout);
                    }
                    if attempt >= self.retry.max_retries {
                        return Err(Error::Transport(e.to_string()));
                    }
                }
            }

            attempt += 1;
            if let Some(delay) = backoff.next_backoff() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {},
                    _ = cancel.cancelled() => return Err(Error::Timeout),
                }
            } else {
                return Err(Error::Timeout);
            }
        }
    }

    /// Reject response bodies over the configured ceiling to bound memory.
    /// A `Content-Length` header is checked as a fast path, but the actual
    /// byte count read off the stream is what is enforced — chunked
    /// transfers (no header) or an understated header must not let an
    /// oversized body through (§4.A "Response bodies over a configured
    /// ceiling are rejected ... to bound memory").
    async fn bounded_body(&self, response: Response) -> Result<String, Error> {
        if let Some(len) = response.content_length()
            && len as usize > MAX_RESPONSE_BYTES
        {
            return Err(Error::MalformedResponse(format!(
                "response body of {len} bytes exceeds the {MAX_RESPONSE_BYTES} byte ceiling"
            )));
        }

        let mut buf = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Transport(e.to_string()))?;
            if buf.len() + chunk.len() > MAX_RESPONSE_BYTES {
                return Err(Error::MalformedResponse(format!(
                    "response body exceeds the {MAX_RESPONSE_BYTES} byte ceiling"
                )));
            }
            buf.extend_from_slice(&chunk);
        }

        String::from_utf8(buf).map_err(|e| Error::MalformedResponse(e.to_string()))
    }

    pub fn elapsed_ms(started: Instant) -> u64 {
        started.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IndexerKind;
    use uuid::Uuid;

    fn sample_indexer() -> Indexer {
        Indexer {
            id: Uuid::new_v4(),
            name: "test".into(),
            base_url: "http://localhost".into(),
            api_path: None,
            kind: IndexerKind::Torznab,
            supports_search: true,
            supports_download: false,
            priority: 50,
            rate_limit_requests: 2,
            rate_limit_window_secs: 1,
            timeout_secs: 10,
            is_active: true,
            user_agent: "foliofox-test".into(),
        }
    }

    #[test]
    fn test_retry_policy_default_bounds() {
        let policy = RetryPolicy::default();
        assert!(policy.max_retries <= 5);
        assert!(policy.initial_interval < policy.max_interval);
    }

    #[test]
    fn test_client_construction_does_not_panic() {
        let indexer = sample_indexer();
        let _client = IndexerClient::new(&indexer, Some("key"));
    }
}
