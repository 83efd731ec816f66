//! Optional NewsAPI-style search (`GET /v2/everything`), enabled when a key is configured.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

use common::{secret_from_env, NewsApiConfig};

use crate::error::PipelineError;
use crate::models::RawArticle;

pub const DEFAULT_URL: &str = "https://newsapi.org/v2/everything";

pub struct NewsApiClient {
    client: Client,
    url: String,
    api_key: String,
    page_size: usize,
    language: Option<String>,
}

impl NewsApiClient {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
            page_size: 20,
            language: Some("en".to_string()),
        })
    }

    /// `None` when the section is absent or its key env var is unset.
    pub fn from_config(cfg: Option<&NewsApiConfig>, timeout_secs: u64) -> Result<Option<Self>> {
        let Some(cfg) = cfg else {
            return Ok(None);
        };
        let Some(api_key) = secret_from_env(cfg.api_key_env.as_deref()) else {
            info!("News search API disabled: no API key configured");
            return Ok(None);
        };
        let mut client = Self::new(
            cfg.api_url.clone().unwrap_or_else(|| DEFAULT_URL.to_string()),
            api_key,
            timeout_secs,
        )?;
        if let Some(size) = cfg.page_size {
            client.page_size = size;
        }
        if cfg.language.is_some() {
            client.language = cfg.language.clone();
        }
        Ok(Some(client))
    }

    pub async fn search(&self, query: &str) -> std::result::Result<Vec<RawArticle>, PipelineError> {
        let unavailable = |reason: String| PipelineError::SourceUnavailable {
            source_name: "news search API".to_string(),
            reason,
        };

        let mut params = vec![
            ("q", query.to_string()),
            ("pageSize", self.page_size.to_string()),
            ("sortBy", "publishedAt".to_string()),
        ];
        if let Some(lang) = &self.language {
            params.push(("language", lang.clone()));
        }

        let response = self
            .client
            .get(&self.url)
            .header("X-Api-Key", &self.api_key)
            .query(&params)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(unavailable(format!("status {}: {}", status, body)));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Parse(format!("news search response: {}", e)))?;

        let articles: Vec<RawArticle> = body
            .articles
            .into_iter()
            .filter_map(ApiArticle::into_raw)
            .collect();
        info!("News search for '{}' returned {} articles", query, articles.len());
        Ok(articles)
    }

    /// Like `search`, but a failure only logs and yields nothing.
    pub async fn search_or_empty(&self, query: &str) -> Vec<RawArticle> {
        match self.search(query).await {
            Ok(articles) => articles,
            Err(e) => {
                warn!("News search failed: {}", e);
                Vec::new()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    articles: Vec<ApiArticle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiArticle {
    source: Option<ApiSource>,
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    url_to_image: Option<String>,
    published_at: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiSource {
    name: Option<String>,
}

impl ApiArticle {
    fn into_raw(self) -> Option<RawArticle> {
        let link = self.url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty())?;
        Some(RawArticle {
            source: self
                .source
                .and_then(|s| s.name)
                .unwrap_or_else(|| "NewsAPI".to_string()),
            title: self.title.unwrap_or_default().trim().to_string(),
            link,
            summary: self.description.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()),
            published_at: self
                .published_at
                .and_then(|p| DateTime::parse_from_rfc3339(&p).ok())
                .map(|d| d.with_timezone(&Utc)),
            raw_content: self.content,
            image: self.url_to_image,
        })
    }
}
