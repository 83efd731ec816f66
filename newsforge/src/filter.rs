//! Topic filtering of collected articles.
//!
//! Keyword filtering fails open: when nothing matches, the unfiltered list comes back.
//! The model-based relevance filter degrades tier by tier (fuzzy title match, then
//! keyword match, then the first N articles) whenever the previous tier finds nothing.

use serde_json::Value;
use tracing::{info, warn};

use crate::enrich::score_value;
use crate::llm::{generate_with_retry, parse_json_value, LlmProvider, LlmRequest};
use crate::models::RawArticle;
use crate::retry::RetryPolicy;

pub const DEFAULT_SAMPLE_SIZE: usize = 40;
pub const DEFAULT_MIN_SCORE: u8 = 50;
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.8;

const STOPWORDS: &[&str] = &["and", "the", "for", "with", "from", "about", "des", "les"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterTier {
    Model,
    Fuzzy,
    Keyword,
    Unfiltered,
}

#[derive(Debug, Clone)]
pub struct RelevanceOutcome {
    pub articles: Vec<RawArticle>,
    pub tier: FilterTier,
}

#[derive(Debug, Clone)]
pub struct RelevanceOptions {
    pub sample_size: usize,
    pub min_score: u8,
    pub fuzzy_threshold: f64,
    pub retry: RetryPolicy,
}

impl Default for RelevanceOptions {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            min_score: DEFAULT_MIN_SCORE,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            retry: RetryPolicy::model_calls(),
        }
    }
}

fn keywords(topic: &str) -> Vec<String> {
    topic
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Indices of articles whose title or summary contains the topic or one of its keywords.
pub fn keyword_matches(articles: &[RawArticle], topic: &str) -> Vec<usize> {
    let phrase = topic.trim().to_lowercase();
    if phrase.is_empty() {
        return Vec::new();
    }
    let words = keywords(&phrase);

    articles
        .iter()
        .enumerate()
        .filter(|(_, a)| {
            let haystack = format!(
                "{} {}",
                a.title.to_lowercase(),
                a.summary.as_deref().unwrap_or("").to_lowercase()
            );
            haystack.contains(&phrase) || words.iter().any(|w| haystack.contains(w.as_str()))
        })
        .map(|(i, _)| i)
        .collect()
}

/// Keep articles matching `topic`; all of them when none match.
pub fn keyword_filter(articles: Vec<RawArticle>, topic: &str) -> Vec<RawArticle> {
    let matches = keyword_matches(&articles, topic);
    if matches.is_empty() {
        info!("No article matches '{}', keeping the unfiltered set", topic);
        return articles;
    }
    info!("Keyword filter '{}': {}/{} articles kept", topic, matches.len(), articles.len());
    let mut keep = vec![false; articles.len()];
    for i in matches {
        keep[i] = true;
    }
    articles
        .into_iter()
        .zip(keep)
        .filter_map(|(a, k)| k.then_some(a))
        .collect()
}

/// Best Jaro-Winkler similarity between the topic and any window of title words of the
/// same length as the topic.
pub fn title_similarity(title: &str, topic: &str) -> f64 {
    let topic_words: Vec<String> = topic
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if topic_words.is_empty() {
        return 0.0;
    }
    let target = topic_words.join(" ");

    let title_words: Vec<String> = title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();
    if title_words.is_empty() {
        return 0.0;
    }

    let window = topic_words.len().min(title_words.len());
    title_words
        .windows(window)
        .map(|w| strsim::jaro_winkler(&w.join(" "), &target))
        .fold(0.0, f64::max)
}

/// Indices of articles whose title is fuzzily similar to `topic`, most similar first.
pub fn fuzzy_matches(articles: &[RawArticle], topic: &str, threshold: f64) -> Vec<usize> {
    let mut scored: Vec<(usize, f64)> = articles
        .iter()
        .enumerate()
        .map(|(i, a)| (i, title_similarity(&a.title, topic)))
        .filter(|(_, s)| *s >= threshold)
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.into_iter().map(|(i, _)| i).collect()
}

/// `{index, score}` entries from either a bare array or `{"results": [...]}`.
/// Invalid indices (out of `len`, negative, non-integer) and low scores are dropped,
/// duplicates keep their first occurrence; the result is sorted by score, highest first.
pub fn parse_relevance(value: &Value, len: usize, min_score: u8) -> Vec<(usize, u8)> {
    let entries = match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("results").or_else(|| map.get("articles")) {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        _ => &[],
    };

    let mut kept: Vec<(usize, u8)> = Vec::new();
    for entry in entries {
        let Some(index) = entry.get("index").and_then(Value::as_u64) else {
            continue;
        };
        let index = index as usize;
        let Some(score) = entry.get("score").and_then(score_value) else {
            continue;
        };
        if index >= len || score < min_score || kept.iter().any(|(i, _)| *i == index) {
            continue;
        }
        kept.push((index, score));
    }
    kept.sort_by(|a, b| b.1.cmp(&a.1));
    kept
}

fn take_indices(articles: &[RawArticle], indices: &[usize], n: usize) -> Vec<RawArticle> {
    indices
        .iter()
        .take(n)
        .filter_map(|&i| articles.get(i).cloned())
        .collect()
}

/// Keep the `n` articles the model rates most relevant to `topic`.
/// Only the first `sample_size` articles are shown to the model.
pub async fn llm_relevance_filter(
    provider: Option<&dyn LlmProvider>,
    articles: &[RawArticle],
    topic: &str,
    n: usize,
    options: &RelevanceOptions,
) -> RelevanceOutcome {
    let sample = &articles[..articles.len().min(options.sample_size)];

    if let (Some(provider), false) = (provider, sample.is_empty()) {
        let listing = sample
            .iter()
            .enumerate()
            .map(|(i, a)| format!("{}. {} | {}", i, a.title, a.summary.as_deref().unwrap_or("")))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Topic: {topic}\n\nRate how relevant each article is to the topic, from 0 to 100.\n\
             Answer with JSON only: {{\"results\": [{{\"index\": 0, \"score\": 85}}, ...]}}\n\n\
             Articles:\n{listing}"
        );
        let request = LlmRequest::new(prompt)
            .system("You rate news articles for topical relevance. You answer with JSON only.")
            .json()
            .temperature(0.0);

        match generate_with_retry(provider, request, &options.retry, "relevance filter").await {
            Ok(response) => match parse_json_value(&response.content) {
                Some(value) => {
                    let ranked = parse_relevance(&value, sample.len(), options.min_score);
                    if !ranked.is_empty() {
                        let indices: Vec<usize> = ranked.iter().map(|(i, _)| *i).collect();
                        info!("Relevance filter kept {} articles for '{}'", indices.len().min(n), topic);
                        return RelevanceOutcome {
                            articles: take_indices(sample, &indices, n),
                            tier: FilterTier::Model,
                        };
                    }
                    warn!("Relevance filter: no article scored >= {}", options.min_score);
                }
                None => warn!("Relevance filter: model answer is not valid JSON"),
            },
            Err(e) => warn!("Relevance filter: {}", e),
        }
    }

    let fuzzy = fuzzy_matches(articles, topic, options.fuzzy_threshold);
    if !fuzzy.is_empty() {
        info!("Relevance fallback: {} fuzzy title matches for '{}'", fuzzy.len(), topic);
        return RelevanceOutcome {
            articles: take_indices(articles, &fuzzy, n),
            tier: FilterTier::Fuzzy,
        };
    }

    let keyword = keyword_matches(articles, topic);
    if !keyword.is_empty() {
        info!("Relevance fallback: {} keyword matches for '{}'", keyword.len(), topic);
        return RelevanceOutcome {
            articles: take_indices(articles, &keyword, n),
            tier: FilterTier::Keyword,
        };
    }

    info!("Relevance fallback: no match for '{}', keeping the first {}", topic, n);
    RelevanceOutcome {
        articles: articles.iter().take(n).cloned().collect(),
        tier: FilterTier::Unfiltered,
    }
}
