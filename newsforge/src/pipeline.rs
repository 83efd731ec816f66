//! One run for one user: collect, dedupe, filter, enrich, select, publish.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use common::{Config, UserConfig};

use crate::artifacts::{self, ArtifactStore};
use crate::curate::{Curator, DEFAULT_FALLBACK_COUNT, DEFAULT_MAX_SELECTED};
use crate::dedupe::normalize;
use crate::enrich::{default_enrichment, Enricher, OnFailure, DEFAULT_CONTENT_CHAR_LIMIT};
use crate::error::PipelineError;
use crate::filter::{keyword_filter, llm_relevance_filter, RelevanceOptions, DEFAULT_MIN_SCORE, DEFAULT_SAMPLE_SIZE};
use crate::ingestion::FeedFetcher;
use crate::llm::{self, LlmProvider};
use crate::models::{EnrichedArticle, RawArticle};
use crate::newsapi::NewsApiClient;
use crate::publish::audio::{write_script, TtsClient};
use crate::publish::blog::render_blog;
use crate::publish::email::{build_draft, deliver, transport_from_config, DeliveryReport, MailTransport};
use crate::publish::newsletter::render_newsletter;
use crate::publish::site::build_site;
use crate::publish::top_articles;
use crate::retry::RetryPolicy;
use crate::sources::SourceCatalog;

pub const DEFAULT_COLLECT_LIMIT: usize = 50;
pub const DEFAULT_SUBJECT: &str = "Your Newsforge digest";

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub skip_email: bool,
    pub skip_audio: bool,
    pub on_failure: OnFailure,
}

/// Summary of a finished run, also written as `run_report.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub user_id: String,
    pub collected: usize,
    pub enriched: usize,
    pub selected: usize,
    pub featured: Option<String>,
    pub audio: bool,
    pub delivery: Option<DeliveryReport>,
    pub artifacts: Vec<PathBuf>,
}

pub struct Pipeline {
    catalog: SourceCatalog,
    fetcher: FeedFetcher,
    news_search: Option<NewsApiClient>,
    llm: Option<Arc<dyn LlmProvider>>,
    retry: RetryPolicy,
    tts: Option<TtsClient>,
    mailer: Option<Box<dyn MailTransport>>,
    data_dir: PathBuf,
    blog_url: Option<String>,
    subject: String,
    collect_limit: usize,
    max_selected: usize,
    fallback_selected: usize,
    content_char_limit: usize,
    relevance: RelevanceOptions,
}

impl Pipeline {
    /// Wire every stage from `config`. `llm` is `None` in fallback-only mode.
    pub fn from_config(config: &Config, llm: Option<Arc<dyn LlmProvider>>) -> Result<Self> {
        let fetch = config.fetch();
        let tuning = config.pipeline();
        let retry = llm::retry_policy(config.llm.as_ref());

        let tts = match &config.tts {
            Some(cfg) => TtsClient::from_config(cfg)?.map(|c| c.with_retry(retry)),
            None => None,
        };
        let mailer = match &config.email {
            Some(cfg) => transport_from_config(cfg)?,
            None => None,
        };

        Ok(Self {
            catalog: SourceCatalog::with_overrides(&config.sources),
            fetcher: FeedFetcher::new(&fetch)?,
            news_search: NewsApiClient::from_config(config.newsapi.as_ref(), fetch.timeout_seconds.unwrap_or(10))?,
            llm,
            retry,
            tts,
            mailer,
            data_dir: PathBuf::from(&config.output.data_dir),
            blog_url: config.output.blog_url.clone(),
            subject: config
                .email
                .as_ref()
                .and_then(|e| e.subject.clone())
                .unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
            collect_limit: tuning.collect_limit.unwrap_or(DEFAULT_COLLECT_LIMIT).max(1),
            max_selected: tuning.max_selected.unwrap_or(DEFAULT_MAX_SELECTED),
            fallback_selected: tuning.fallback_selected.unwrap_or(DEFAULT_FALLBACK_COUNT),
            content_char_limit: tuning.content_char_limit.unwrap_or(DEFAULT_CONTENT_CHAR_LIMIT),
            relevance: RelevanceOptions {
                sample_size: tuning.relevance_sample_size.unwrap_or(DEFAULT_SAMPLE_SIZE),
                min_score: tuning.min_relevance_score.unwrap_or(DEFAULT_MIN_SCORE),
                retry,
                ..Default::default()
            },
        })
    }

    pub fn with_tts(mut self, tts: Option<TtsClient>) -> Self {
        self.tts = tts;
        self
    }

    pub fn with_mailer(mut self, mailer: Option<Box<dyn MailTransport>>) -> Self {
        self.mailer = mailer;
        self
    }

    /// Retry policy for model, TTS-script and relevance calls.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self.relevance.retry = retry;
        self
    }

    pub fn with_fetch_retry(mut self, retry: RetryPolicy) -> Self {
        self.fetcher = self.fetcher.with_retry(retry);
        self
    }

    pub fn with_catalog(mut self, catalog: SourceCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn catalog(&self) -> &SourceCatalog {
        &self.catalog
    }

    /// Fetch, dedupe and topic-filter the articles for `prefs`, newest first.
    pub async fn collect(&self, prefs: &UserConfig) -> Result<Vec<RawArticle>> {
        let topic = prefs.domain_or_topic.trim();
        if topic.is_empty() {
            return Err(PipelineError::Validation("domain or topic is empty".to_string()).into());
        }

        let selection = self.catalog.resolve(topic);
        info!(
            "Collecting for '{}' from {} feeds{}",
            selection.query(),
            selection.feeds().len(),
            if selection.is_free_text() { " (free-text topic)" } else { "" }
        );

        let mut raw = self.fetcher.fetch_all(selection.feeds()).await;
        if let Some(search) = &self.news_search {
            raw.extend(search.search_or_empty(selection.query()).await);
        }
        let articles = normalize(raw, usize::MAX);
        let limit = self.article_limit(prefs);

        let mut articles = if prefs.use_llm_filter {
            let outcome = llm_relevance_filter(
                self.llm.as_deref(),
                &articles,
                selection.query(),
                limit,
                &self.relevance,
            )
            .await;
            info!("Relevance filter tier: {:?}", outcome.tier);
            outcome.articles
        } else if selection.is_free_text() {
            keyword_filter(articles, selection.query())
        } else {
            articles
        };
        articles.truncate(limit);
        info!("Collected {} articles (limit {})", articles.len(), limit);
        Ok(articles)
    }

    /// The user's article count, capped by `pipeline.collect_limit`.
    fn article_limit(&self, prefs: &UserConfig) -> usize {
        (prefs.article_count as usize).clamp(1, self.collect_limit)
    }

    async fn enrich(&self, articles: &[RawArticle], on_failure: OnFailure) -> Vec<EnrichedArticle> {
        match &self.llm {
            Some(provider) => {
                Enricher::new(Arc::clone(provider))
                    .with_retry(self.retry)
                    .with_content_limit(self.content_char_limit)
                    .enrich_all(articles, on_failure)
                    .await
            }
            None => {
                info!("No LLM provider, using default enrichment");
                articles.iter().map(default_enrichment).collect()
            }
        }
    }

    /// Run every stage for `user_id` and write the artifacts under `data_dir/<user_id>/`.
    pub async fn run(&self, user_id: &str, prefs: &UserConfig, options: &PipelineOptions) -> Result<RunReport> {
        let store = ArtifactStore::for_user(&self.data_dir, user_id)?;
        let mut written = Vec::new();
        info!(user = user_id, topic = %prefs.domain_or_topic, "pipeline run started");

        let raw = self.collect(prefs).await?;
        written.push(store.write_json(artifacts::RAW_ARTICLES, &raw).await?);

        let enriched = self.enrich(&raw, options.on_failure).await;
        written.push(store.write_json(artifacts::ENRICHED_ARTICLES, &enriched).await?);

        let max_selected = self.max_selected.min(prefs.article_count as usize).max(1);
        let selection = Curator::new(self.llm.clone())
            .with_retry(self.retry)
            .with_limits(max_selected, self.fallback_selected)
            .select(&enriched)
            .await;
        written.push(store.write_json(artifacts::SELECTION, &selection).await?);

        let now = Utc::now();
        let curated = selection.pick(&enriched);
        let featured = selection.featured(&enriched);
        let blog_url = self.blog_url.as_deref();

        let newsletter = render_newsletter(&enriched, &selection, blog_url, now);
        written.push(store.write_text(artifacts::NEWSLETTER, &newsletter).await?);

        let audio = match (&self.tts, options.skip_audio || curated.is_empty()) {
            (Some(tts), false) => {
                let script = write_script(self.llm.as_deref(), &self.retry, featured, &curated).await;
                match tts.synthesize(&script).await {
                    Ok(bytes) => {
                        written.push(store.write_bytes(artifacts::CAPSULE, &bytes).await?);
                        Some(bytes)
                    }
                    Err(e) => {
                        warn!("Audio capsule skipped: {}", e);
                        None
                    }
                }
            }
            _ => None,
        };

        let blog = render_blog(&curated, audio.as_deref(), now);
        written.push(store.write_text(artifacts::BLOG, &blog).await?);

        let pages = build_site(&enriched, &selection, now);
        written.push(store.write_site(&pages).await?);

        let top = top_articles(&enriched, &selection);
        let draft = build_draft(self.llm.as_deref(), &self.retry, &self.subject, &top, blog_url).await;
        written.push(store.write_text(artifacts::EMAIL_DRAFT, &draft.intro).await?);

        let delivery = match &self.mailer {
            _ if options.skip_email => None,
            None => {
                info!("No email transport configured");
                None
            }
            Some(_) if prefs.recipients.is_empty() || top.is_empty() => {
                info!("Nothing to send: {} recipients, {} articles", prefs.recipients.len(), top.len());
                None
            }
            Some(mailer) => Some(deliver(mailer.as_ref(), &draft, &prefs.recipients).await),
        };

        let report = RunReport {
            user_id: user_id.to_string(),
            collected: raw.len(),
            enriched: enriched.len(),
            selected: selection.selected_indices.len(),
            featured: featured.map(|a| a.title().to_string()),
            audio: audio.is_some(),
            delivery,
            artifacts: written,
        };
        store.write_json(artifacts::REPORT, &report).await?;
        info!(
            user = user_id,
            collected = report.collected,
            selected = report.selected,
            audio = report.audio,
            "pipeline run finished"
        );
        Ok(report)
    }
}
