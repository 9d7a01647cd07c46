//! Fetcher `Handler` (§4.4): turns a `url`-queue task into fetched bytes and
//! discovered links. HTTP client tuning, sitemap parsing and link extraction
//! are the external collaborators named in §1's Non-goals; this handler
//! only owns the include/exclude/domain-scoping contract and the
//! transient/permanent error classification around them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::config::FetcherConfig;
use crate::dedup::compute_content_hash;
use crate::discovery::sitemap::discover_sitemap_urls;
use crate::envelope::TaskEnvelope;
use crate::queue::{QueueManager, QUEUE_URL};
use crate::rate_limit::RateLimiter;
use crate::worker::{Handler, HandlerError};

pub struct FetchHandler {
    client: reqwest::Client,
    config: FetcherConfig,
    rate_limiter: Arc<dyn RateLimiter>,
    include_patterns: Vec<Regex>,
    exclude_patterns: Vec<Regex>,
    queue: QueueManager,
}

impl FetchHandler {
    /// `queue` is the same queue manager the stage loop dequeues `url`
    /// tasks from - the fetcher re-enqueues discovered links onto it
    /// directly (§4.4 "Sitemap discovery... emits additional URL envelopes
    /// into `url`"; §9 "the fetcher emits discovered links as new
    /// envelopes").
    pub fn new(config: FetcherConfig, rate_limiter: Arc<dyn RateLimiter>, queue: QueueManager) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(30))
            .build()?;
        // Patterns that fail to compile are dropped rather than rejecting
        // the whole config - matching the teacher's `filter_map(Regex::new)`
        // leniency for operator-supplied patterns.
        let include_patterns = config.include_patterns.iter().filter_map(|p| Regex::new(p).ok()).collect();
        let exclude_patterns = config.exclude_patterns.iter().filter_map(|p| Regex::new(p).ok()).collect();
        Ok(Self { client, config, rate_limiter, include_patterns, exclude_patterns, queue })
    }

    fn is_allowed(&self, url: &str) -> bool {
        if !self.include_patterns.is_empty() && !self.include_patterns.iter().any(|p| p.is_match(url)) {
            return false;
        }
        !self.exclude_patterns.iter().any(|p| p.is_match(url))
    }

    /// Exponential backoff seeded from `base_delay_ms`, doubling per retry
    /// attempt and capped at 30s so a pathological `retry_count` can't
    /// stall a worker indefinitely (§4.4 "increasing backoff").
    fn backoff_delay(&self, retry_count: u32) -> Duration {
        let shift = retry_count.min(8);
        let delay_ms = self.config.base_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay_ms.min(30_000))
    }

    /// Re-enqueue each discovered/sitemap link as a fresh `url` task,
    /// respecting the same include/exclude filter applied to the envelope
    /// being processed - a discovered link outside the configured scope
    /// should not re-enter the crawl just because it was linked from a page
    /// that was in scope.
    async fn seed_discovered(&self, site_id: &str, links: &[String]) {
        for link in links {
            if !self.is_allowed(link) {
                continue;
            }
            let envelope = TaskEnvelope::seed(link.clone(), site_id.to_string());
            if let Err(e) = self.queue.enqueue(QUEUE_URL, envelope, None).await {
                warn!(url = %link, "failed to seed discovered url: {e}");
            }
        }
    }

    fn extract_links(&self, base: &Url, body: &str) -> Vec<String> {
        let document = Html::parse_document(body);
        let Ok(selector) = Selector::parse("a[href]") else {
            return Vec::new();
        };
        document
            .select(&selector)
            .filter_map(|el| el.value().attr("href"))
            .filter_map(|href| base.join(href).ok())
            .filter(|link| self.config.follow_external || link.domain() == base.domain())
            .map(|link| link.to_string())
            .collect()
    }
}

#[async_trait]
impl Handler for FetchHandler {
    async fn process(&self, mut envelope: TaskEnvelope, retry_count: u32) -> Result<Option<TaskEnvelope>, HandlerError> {
        if !self.is_allowed(&envelope.url) {
            debug!(url = %envelope.url, "skipped by include/exclude filter");
            return Ok(None);
        }

        let url = Url::parse(&envelope.url)
            .map_err(|e| HandlerError::Permanent(format!("invalid url {}: {e}", envelope.url)))?;

        let domain = url.domain().unwrap_or("").to_string();
        self.rate_limiter
            .wait_turn(&domain, self.config.base_delay_ms)
            .await
            .map_err(|e| HandlerError::Transient(format!("rate limiter unavailable: {e}")))?;

        let response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                // Connect/timeout: increasing backoff per retry attempt (§4.4).
                tokio::time::sleep(self.backoff_delay(retry_count)).await;
                return Err(HandlerError::Transient(format!("fetch failed: {e}")));
            }
        };

        let status = response.status();
        envelope.status_code = Some(status.as_u16());

        if status == StatusCode::TOO_MANY_REQUESTS {
            // 429: longer delay than a plain 5xx (§4.4).
            tokio::time::sleep(self.backoff_delay(retry_count) * 4).await;
            return Err(HandlerError::Transient(format!("upstream status {status}")));
        }
        if status.is_server_error() {
            // 5xx: retry after a flat delay (§4.4).
            tokio::time::sleep(self.backoff_delay(0)).await;
            return Err(HandlerError::Transient(format!("upstream status {status}")));
        }
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            // Forwarded downstream rather than failed: the persister reads
            // `status_code` to recognize a deletion (§9 Open Question).
            envelope.content = Some(Vec::new());
            envelope.content_hash = Some(compute_content_hash(&[]));
            envelope.touch();
            return Ok(Some(envelope));
        }
        if status.is_client_error() {
            return Err(HandlerError::Permanent(format!("upstream status {status}")));
        }

        envelope.mimetype = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(';').next().unwrap_or(s).trim().to_string());
        envelope.headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| HandlerError::Transient(format!("failed reading body: {e}")))?;

        envelope.content_hash = Some(compute_content_hash(&bytes));

        if envelope
            .mimetype
            .as_deref()
            .map(|m| m.starts_with("text/html"))
            .unwrap_or(false)
        {
            let body = String::from_utf8_lossy(&bytes).into_owned();
            envelope.links = self.extract_links(&url, &body);

            if self.config.discover_sitemap {
                match discover_sitemap_urls(&self.client, &url).await {
                    Ok(mut discovered) => envelope.links.append(&mut discovered),
                    Err(e) => debug!(url = %envelope.url, "sitemap discovery skipped: {e}"),
                }
            }

            self.seed_discovered(&envelope.site_id, &envelope.links).await;
        }

        envelope.content = Some(bytes.to_vec());
        envelope.touch();
        Ok(Some(envelope))
    }
}
