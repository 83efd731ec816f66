//! Per-article enrichment: summaries, tags, classification and a relevance score.
//!
//! The model is asked for one JSON object per article. Whatever it returns is read
//! leniently: missing or corrupt fields get defaults, scores are clamped, so an
//! `EnrichedArticle` is always well-formed even when the model is not.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::EnrichmentError;
use crate::llm::fallback::{extractive_summary, truncate};
use crate::llm::{extract_json_from_text, generate_with_retry, LlmProvider, LlmRequest};
use crate::models::{Audience, ContentType, EnrichedArticle, RawArticle, DEFAULT_TOPIC};
use crate::retry::RetryPolicy;
use crate::PipelineError;

pub const DEFAULT_CONTENT_CHAR_LIMIT: usize = 4000;
const SHORT_SUMMARY_CHARS: usize = 280;
const MAX_TAGS: usize = 8;

const SYSTEM_PROMPT: &str = r#"You are an editor for a technology news digest.
For the article you are given, answer with ONE strictly valid JSON object:
{
  "short_summary": "one or two sentences",
  "detailed_summary": "5 to 10 informative lines explaining the key facts directly",
  "tags": ["2 to 5 short keywords"],
  "content_type": "news | research | tutorial | product | opinion",
  "audience": "beginner | intermediate | expert",
  "topic": "short topic label, e.g. LLM, robotics, chips & hardware",
  "relevance_score": 0-100,
  "score_rationale": "one sentence"
}
Never write phrases like "the article says". No text outside the JSON."#;

/// What `enrich_all` does with an article whose enrichment failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnFailure {
    Skip,
    /// Keep the article with default enrichment
    #[default]
    KeepRaw,
}

pub struct Enricher {
    provider: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
    content_char_limit: usize,
}

impl Enricher {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            retry: RetryPolicy::model_calls(),
            content_char_limit: DEFAULT_CONTENT_CHAR_LIMIT,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_content_limit(mut self, chars: usize) -> Self {
        self.content_char_limit = chars;
        self
    }

    fn build_prompt(&self, article: &RawArticle) -> String {
        let mut prompt = format!("Title: {}\nSource: {}\n", article.title, article.source);
        if let Some(summary) = &article.summary {
            prompt.push_str(&format!("Feed summary:\n{}\n", summary));
        }
        if let Some(content) = &article.raw_content {
            let excerpt: String = content.chars().take(self.content_char_limit).collect();
            prompt.push_str(&format!("Content excerpt:\n{}\n", excerpt));
        }
        prompt
    }

    /// Enrich one article. Call failures are retried; an unparsable answer is not.
    pub async fn enrich(&self, article: &RawArticle) -> Result<EnrichedArticle, EnrichmentError> {
        let request = LlmRequest::new(self.build_prompt(article))
            .system(SYSTEM_PROMPT)
            .json()
            .temperature(0.3)
            .max_tokens(700);

        let label = format!("enrichment of '{}'", truncate(&article.title, 60));
        let response = generate_with_retry(self.provider.as_ref(), request, &self.retry, &label)
            .await
            .map_err(|e| match e {
                PipelineError::ModelCall { attempts, reason } => EnrichmentError::ModelCall { attempts, reason },
                other => EnrichmentError::ModelCall {
                    attempts: 0,
                    reason: other.to_string(),
                },
            })?;

        parse_enrichment(article, &response.content)
    }

    /// Enrich a batch sequentially. One failure never aborts the batch.
    pub async fn enrich_all(&self, articles: &[RawArticle], on_failure: OnFailure) -> Vec<EnrichedArticle> {
        let total = articles.len();
        let mut enriched = Vec::with_capacity(total);
        let mut failures = 0;

        for (i, article) in articles.iter().enumerate() {
            info!("Enriching article {}/{}: {}", i + 1, total, article.title);
            match self.enrich(article).await {
                Ok(e) => enriched.push(e),
                Err(e) => {
                    failures += 1;
                    warn!("Enrichment failed for '{}': {}", article.title, e);
                    if on_failure == OnFailure::KeepRaw {
                        enriched.push(default_enrichment(article));
                    }
                }
            }
        }

        info!(total, failures, kept = enriched.len(), "enrichment finished");
        enriched
    }
}

/// Enrichment used when no model output is available.
pub fn default_enrichment(article: &RawArticle) -> EnrichedArticle {
    EnrichedArticle {
        article: article.clone(),
        short_summary: fallback_short_summary(article),
        detailed_summary: fallback_detailed_summary(article),
        tags: Vec::new(),
        content_type: ContentType::default(),
        audience: Audience::default(),
        relevance_score: 0,
        score_rationale: String::new(),
        topic: DEFAULT_TOPIC.to_string(),
    }
}

/// Read a model answer into an `EnrichedArticle`, defaulting what is missing.
pub fn parse_enrichment(article: &RawArticle, text: &str) -> Result<EnrichedArticle, EnrichmentError> {
    let candidate = extract_json_from_text(text)
        .ok_or_else(|| EnrichmentError::Malformed("no JSON object in model output".to_string()))?;
    let value: Value = serde_json::from_str(&candidate)
        .map_err(|e| EnrichmentError::Malformed(format!("invalid JSON: {}", e)))?;
    let Value::Object(fields) = value else {
        return Err(EnrichmentError::Malformed("expected a JSON object".to_string()));
    };

    let short_summary = string_field(&fields, "short_summary")
        .map(|s| truncate(&s, SHORT_SUMMARY_CHARS))
        .unwrap_or_else(|| fallback_short_summary(article));
    let detailed_summary = string_field(&fields, "detailed_summary")
        .unwrap_or_else(|| fallback_detailed_summary(article));

    Ok(EnrichedArticle {
        article: article.clone(),
        short_summary,
        detailed_summary,
        tags: tags_field(&fields),
        content_type: string_field(&fields, "content_type")
            .and_then(|s| ContentType::parse_label(&s))
            .unwrap_or_default(),
        audience: string_field(&fields, "audience")
            .and_then(|s| Audience::parse_label(&s))
            .unwrap_or_default(),
        relevance_score: fields.get("relevance_score").and_then(score_value).unwrap_or(0),
        score_rationale: string_field(&fields, "score_rationale").unwrap_or_default(),
        topic: string_field(&fields, "topic").unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
    })
}

fn string_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Accepts an array of strings or a comma-separated string.
fn tags_field(fields: &Map<String, Value>) -> Vec<String> {
    let raw: Vec<String> = match fields.get("tags") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };

    let mut tags: Vec<String> = Vec::new();
    for tag in raw {
        let tag = tag.trim().to_string();
        if !tag.is_empty() && !tags.iter().any(|t| t.eq_ignore_ascii_case(&tag)) {
            tags.push(tag);
        }
    }
    tags.truncate(MAX_TAGS);
    tags
}

/// Integer, float or numeric string, clamped into 0..=100.
pub fn score_value(value: &Value) -> Option<u8> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !n.is_finite() {
        return None;
    }
    Some(n.round().clamp(0.0, 100.0) as u8)
}

fn fallback_short_summary(article: &RawArticle) -> String {
    match &article.summary {
        Some(summary) => extractive_summary(summary, SHORT_SUMMARY_CHARS),
        None => truncate(&article.title, SHORT_SUMMARY_CHARS),
    }
}

fn fallback_detailed_summary(article: &RawArticle) -> String {
    article
        .summary
        .clone()
        .or_else(|| article.raw_content.as_ref().map(|c| truncate(c, 1000)))
        .unwrap_or_else(|| article.title.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw() -> RawArticle {
        RawArticle {
            source: "Lab Blog".into(),
            title: "A new tokenizer".into(),
            link: "https://lab.example/tokenizer".into(),
            summary: Some("We release a tokenizer. It is fast.".into()),
            published_at: None,
            raw_content: None,
            image: None,
        }
    }

    #[test]
    fn well_formed_answer() {
        let text = r#"{"short_summary":"Fast tokenizer released.","detailed_summary":"Long text.",
            "tags":["nlp","tokenizer"],"content_type":"Product","audience":"expert",
            "topic":"NLP","relevance_score":87,"score_rationale":"Useful."}"#;
        let e = parse_enrichment(&raw(), text).unwrap();
        assert_eq!(e.short_summary, "Fast tokenizer released.");
        assert_eq!(e.tags, vec!["nlp", "tokenizer"]);
        assert_eq!(e.content_type, ContentType::Product);
        assert_eq!(e.audience, Audience::Expert);
        assert_eq!(e.topic, "NLP");
        assert_eq!(e.relevance_score, 87);
    }

    #[test]
    fn missing_and_corrupt_fields_get_defaults() {
        let text = r#"Here: {"content_type":"podcast","audience":42,"relevance_score":"not a number","tags":"a, b, ,A"}"#;
        let e = parse_enrichment(&raw(), text).unwrap();
        assert_eq!(e.content_type, ContentType::News);
        assert_eq!(e.audience, Audience::Beginner);
        assert_eq!(e.relevance_score, 0);
        assert_eq!(e.tags, vec!["a", "b"]);
        assert_eq!(e.short_summary, "We release a tokenizer.");
        assert_eq!(e.detailed_summary, "We release a tokenizer. It is fast.");
        assert_eq!(e.topic, DEFAULT_TOPIC);
        assert_eq!(e.score_rationale, "");
    }

    #[test]
    fn scores_are_clamped() {
        assert_eq!(score_value(&json!(250)), Some(100));
        assert_eq!(score_value(&json!(-4)), Some(0));
        assert_eq!(score_value(&json!(72.6)), Some(73));
        assert_eq!(score_value(&json!("64")), Some(64));
        assert_eq!(score_value(&json!("80%")), Some(80));
        assert_eq!(score_value(&json!(null)), None);
        assert_eq!(score_value(&json!([1])), None);
    }

    #[test]
    fn non_object_answers_are_malformed() {
        assert!(matches!(
            parse_enrichment(&raw(), "I cannot help with that"),
            Err(EnrichmentError::Malformed(_))
        ));
        assert!(matches!(
            parse_enrichment(&raw(), "[1, 2, 3]"),
            Err(EnrichmentError::Malformed(_))
        ));
    }

    #[test]
    fn default_enrichment_uses_feed_text() {
        let mut article = raw();
        article.summary = None;
        let e = default_enrichment(&article);
        assert_eq!(e.short_summary, "A new tokenizer");
        assert_eq!(e.relevance_score, 0);
        assert_eq!(e.content_type, ContentType::News);
        assert!(e.tags.is_empty());
    }
}
