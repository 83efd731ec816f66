use anyhow::{Context, Result};
use feed_rs::model::{Entry, Feed};
use feed_rs::parser;
use futures::future::join_all;
use reqwest::{Client, StatusCode};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use common::FetchConfig;

use crate::dedupe::html_to_text;
use crate::error::PipelineError;
use crate::models::RawArticle;
use crate::retry::RetryPolicy;

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_ITEMS_PER_FEED: usize = 20;
const DEFAULT_USER_AGENT: &str = "Newsforge/0.1.0";

/// Why a single HTTP attempt failed; only transient failures are retried.
#[derive(Debug)]
enum FetchFailure {
    /// 5xx, 429 or network error
    Transient(String),
    /// Timeout or any other non-success status
    Permanent(String),
}

impl FetchFailure {
    fn is_transient(&self) -> bool {
        matches!(self, FetchFailure::Transient(_))
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailure::Transient(msg) | FetchFailure::Permanent(msg) => f.write_str(msg),
        }
    }
}

/// Fetches RSS/Atom feeds and turns their entries into `RawArticle`s.
pub struct FeedFetcher {
    client: Client,
    max_items: usize,
    retry: RetryPolicy,
}

impl FeedFetcher {
    /// `fetch.timeout_seconds` bounds every HTTP attempt against a source. A timed-out
    /// attempt is not retried, so a hanging source costs a single timeout.
    pub fn new(fetch: &FetchConfig) -> Result<Self> {
        let timeout = fetch.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let user_agent = fetch
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .user_agent(user_agent)
            .build()
            .context("failed to build reqwest client")?;

        let mut retry = RetryPolicy::feed_fetches();
        if let Some(attempts) = fetch.max_attempts {
            retry = RetryPolicy::new(attempts, retry.backoff);
        }

        Ok(Self {
            client,
            max_items: fetch.max_items_per_feed.unwrap_or(DEFAULT_MAX_ITEMS_PER_FEED),
            retry,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_bytes(&self, url: &str) -> std::result::Result<Vec<u8>, FetchFailure> {
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Err(FetchFailure::Permanent(format!("timed out: {}", e))),
            Err(e) => return Err(FetchFailure::Transient(format!("network error: {}", e))),
        };

        let status = response.status();
        if status.is_success() {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        FetchFailure::Permanent(format!("timed out reading body: {}", e))
                    } else {
                        FetchFailure::Transient(format!("failed to read response body: {}", e))
                    }
                })?;
            Ok(bytes.to_vec())
        } else if status.is_server_error() {
            Err(FetchFailure::Transient(format!("server error: {}", status)))
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            Err(FetchFailure::Transient(format!("rate limited: {}", status)))
        } else {
            // 4xx and friends won't get better by asking again
            Err(FetchFailure::Permanent(format!("feed fetch failed with status: {}", status)))
        }
    }

    /// Fetch and parse one feed, retrying 5xx, 429 and network errors (timeouts excluded).
    pub async fn fetch_feed(&self, url: &str) -> std::result::Result<Feed, PipelineError> {
        let bytes = self
            .retry
            .run_when(url, FetchFailure::is_transient, move |_| self.fetch_bytes(url))
            .await
            .map_err(|e| PipelineError::SourceUnavailable {
                source_name: url.to_string(),
                reason: e.to_string(),
            })?;

        parser::parse(bytes.as_slice())
            .map_err(|e| PipelineError::Parse(format!("failed to parse feed {}: {}", url, e)))
    }

    /// Articles of one source, capped at `max_items_per_feed`.
    pub async fn fetch_source(&self, url: &str) -> std::result::Result<Vec<RawArticle>, PipelineError> {
        let feed = self.fetch_feed(url).await?;
        let source_name = feed
            .title
            .as_ref()
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| host_of(url));

        let articles: Vec<RawArticle> = feed
            .entries
            .iter()
            .take(self.max_items)
            .map(|entry| entry_to_article(&source_name, entry))
            .collect();
        info!("Fetched feed '{}': {} items", url, articles.len());
        Ok(articles)
    }

    /// Fetch every source concurrently. A failing source is logged and contributes
    /// nothing; results are concatenated in source order.
    pub async fn fetch_all(&self, urls: &[String]) -> Vec<RawArticle> {
        let results = join_all(urls.iter().map(|url| self.fetch_source(url))).await;

        let mut articles = Vec::new();
        let mut failed = 0;
        for (url, result) in urls.iter().zip(results) {
            match result {
                Ok(mut batch) => articles.append(&mut batch),
                Err(e) => {
                    failed += 1;
                    warn!("Skipping source {}: {}", url, e);
                }
            }
        }
        info!(
            sources = urls.len(),
            failed,
            articles = articles.len(),
            "feed collection finished"
        );
        articles
    }
}

/// Map a feed entry to a `RawArticle`. HTML in the summary is flattened to text.
pub fn entry_to_article(source_name: &str, entry: &Entry) -> RawArticle {
    let title = entry
        .title
        .as_ref()
        .map(|t| html_to_text(&t.content))
        .unwrap_or_default();

    let link = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |r| r == "alternate"))
        .or_else(|| entry.links.first())
        .map(|l| l.href.trim().to_string())
        .unwrap_or_default();

    let summary = entry
        .summary
        .as_ref()
        .map(|s| html_to_text(&s.content))
        .filter(|s| !s.is_empty());

    let raw_content = entry
        .content
        .as_ref()
        .and_then(|c| c.body.as_deref())
        .map(html_to_text)
        .filter(|s| !s.is_empty());

    if link.is_empty() {
        debug!("Entry without link, identity falls back to title: {:?}", title);
    }

    RawArticle {
        source: source_name.to_string(),
        title,
        link,
        summary,
        published_at: entry.published.or(entry.updated),
        raw_content,
        image: entry_image(entry),
    }
}

/// First image found in media content, media thumbnails or image-typed links.
fn entry_image(entry: &Entry) -> Option<String> {
    for media in &entry.media {
        for content in &media.content {
            let is_image = content
                .content_type
                .as_ref()
                .map_or(true, |m| m.to_string().starts_with("image"));
            if is_image {
                if let Some(url) = &content.url {
                    return Some(url.to_string());
                }
            }
        }
        if let Some(thumb) = media.thumbnails.first() {
            return Some(thumb.image.uri.clone());
        }
    }

    entry
        .links
        .iter()
        .find(|l| l.media_type.as_deref().map_or(false, |t| t.starts_with("image")))
        .map(|l| l.href.clone())
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_else(|| url.to_string())
}
