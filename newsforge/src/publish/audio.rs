//! Audio capsule: a short narration script turned into MP3 by an OpenAI-compatible
//! `/audio/speech` endpoint.

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::info;

use common::{secret_from_env, TtsConfig};

use super::BRAND;
use crate::error::PipelineError;
use crate::llm::fallback::{generate_or_else, truncate};
use crate::llm::{LlmProvider, LlmRequest};
use crate::models::EnrichedArticle;
use crate::retry::RetryPolicy;

/// Upper bound on the narration length, in chars.
pub const MAX_SCRIPT_CHARS: usize = 2500;

pub const DEFAULT_TTS_URL: &str = "https://api.openai.com/v1/audio/speech";

const CLOSING: &str = " That's all for this capsule, thanks for listening.";

const SCRIPT_SYSTEM_PROMPT: &str = "You write scripts for a short spoken news capsule. \
Plain sentences only: no markdown, no lists, no URLs, no stage directions.";

/// Deterministic narration of the featured article.
pub fn template_script(featured: &EnrichedArticle) -> String {
    format!(
        "Welcome to the {} audio capsule. Today's featured story comes from {}: {}. {}{}",
        BRAND,
        featured.article.source,
        featured.title().trim_end_matches('.'),
        featured.detailed_summary.trim(),
        CLOSING
    )
}

/// Deterministic narration going over every curated headline.
pub fn digest_script(curated: &[&EnrichedArticle]) -> String {
    let mut script = format!("Welcome to the {} audio capsule. Here is today's digest.", BRAND);
    for (i, article) in curated.iter().enumerate() {
        script.push_str(&format!(
            " Story {}: {}. {}",
            i + 1,
            article.title().trim_end_matches('.'),
            article.short_summary.trim()
        ));
    }
    script.push_str(CLOSING);
    script
}

/// Cut `script` to at most `max_chars`, preferably at a sentence end, and close it
/// with a sign-off sentence.
pub fn bound_script(script: &str, max_chars: usize) -> String {
    let script = script.trim();
    if script.chars().count() <= max_chars {
        return script.to_string();
    }
    let closing_len = CLOSING.chars().count();
    if max_chars <= closing_len {
        return truncate(script, max_chars);
    }

    let budget = max_chars - closing_len;
    let head: String = script.chars().take(budget).collect();
    let sentence_end = head.rfind(['.', '!', '?']).filter(|&i| i >= head.len() / 2);
    let cut = match sentence_end {
        Some(i) => &head[..=i],
        None => match head.rfind(char::is_whitespace) {
            Some(i) if i > 0 => &head[..i],
            _ => head.as_str(),
        },
    };
    let mut bounded = cut.trim_end().to_string();
    if !bounded.ends_with(['.', '!', '?']) {
        bounded.push('.');
        // the extra period must still fit
        if bounded.chars().count() > budget {
            bounded = bounded.chars().take(budget.saturating_sub(1)).collect::<String>().trim_end().to_string();
            bounded.push('.');
        }
    }
    bounded.push_str(CLOSING);
    bounded
}

/// Narration script for the capsule: model-written when possible, bounded either way.
pub async fn write_script(
    provider: Option<&dyn LlmProvider>,
    retry: &RetryPolicy,
    featured: Option<&EnrichedArticle>,
    curated: &[&EnrichedArticle],
) -> String {
    let (prompt, fallback) = match featured {
        Some(article) => (
            format!(
                "Write a spoken script of about 250 words presenting this story.\n\
                 Title: {}\nSource: {}\nSummary: {}\nTags: {}",
                article.title(),
                article.article.source,
                article.detailed_summary,
                article.tags.join(", ")
            ),
            template_script(article),
        ),
        None => {
            let listing = curated
                .iter()
                .map(|a| format!("- {}: {}", a.title(), a.short_summary))
                .collect::<Vec<_>>()
                .join("\n");
            (
                format!("Write a spoken script of about 250 words going over these stories:\n{}", listing),
                digest_script(curated),
            )
        }
    };

    let request = LlmRequest::new(prompt)
        .system(SCRIPT_SYSTEM_PROMPT)
        .max_tokens(700)
        .temperature(0.5);
    let script = generate_or_else(provider, request, retry, "audio script", || fallback).await;
    bound_script(&script, MAX_SCRIPT_CHARS)
}

/// Client for an OpenAI-compatible speech endpoint.
pub struct TtsClient {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    voice: String,
    retry: RetryPolicy,
}

impl TtsClient {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            retry: RetryPolicy::model_calls(),
        })
    }

    /// `None` when no API key is available.
    pub fn from_config(cfg: &TtsConfig) -> Result<Option<Self>> {
        let Some(api_key) = secret_from_env(cfg.api_key_env.as_deref()) else {
            info!("Audio capsule disabled: no TTS API key configured");
            return Ok(None);
        };
        let mut client = Self::new(
            cfg.api_url.clone().unwrap_or_else(|| DEFAULT_TTS_URL.to_string()),
            api_key,
            cfg.timeout_seconds.unwrap_or(60),
        )?;
        if let Some(model) = &cfg.model {
            client.model = model.clone();
        }
        if let Some(voice) = &cfg.voice {
            client.voice = voice.clone();
        }
        Ok(Some(client))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn request_speech(&self, script: &str) -> Result<Vec<u8>> {
        let body = json!({
            "model": self.model,
            "input": script,
            "voice": self.voice,
            "response_format": "mp3",
        });
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("TTS request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("TTS API error ({}): {}", status, text);
        }
        let bytes = response.bytes().await.context("failed to read TTS audio")?;
        if bytes.is_empty() {
            anyhow::bail!("TTS API returned no audio");
        }
        Ok(bytes.to_vec())
    }

    /// MP3 bytes for `script`.
    pub async fn synthesize(&self, script: &str) -> std::result::Result<Vec<u8>, PipelineError> {
        if script.trim().is_empty() {
            return Err(PipelineError::Validation("empty narration script".to_string()));
        }
        let audio = self
            .retry
            .run("tts", |_| self.request_speech(script))
            .await
            .map_err(|e| PipelineError::ModelCall {
                attempts: e.attempts,
                reason: format!("{:#}", e.last),
            })?;
        info!("Synthesized {} bytes of audio ({} script chars)", audio.len(), script.chars().count());
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::fixtures::enriched;

    #[test]
    fn short_scripts_are_untouched() {
        assert_eq!(bound_script("  Hello there.  ", 100), "Hello there.");
    }

    #[test]
    fn long_scripts_end_on_a_sentence_and_sign_off() {
        let long = "This is one sentence about the news. ".repeat(200);
        let bounded = bound_script(&long, MAX_SCRIPT_CHARS);
        assert!(bounded.chars().count() <= MAX_SCRIPT_CHARS);
        assert!(bounded.ends_with(CLOSING));
        let body = bounded.trim_end_matches(CLOSING);
        assert!(body.ends_with("news."));
    }

    #[test]
    fn long_scripts_without_punctuation_cut_on_a_word() {
        let long = "word ".repeat(1000);
        let bounded = bound_script(&long, 300);
        assert!(bounded.chars().count() <= 300);
        assert!(bounded.ends_with(CLOSING));
        assert!(bounded.trim_end_matches(CLOSING).ends_with("word."));
    }

    #[test]
    fn template_mentions_featured_story() {
        let article = enriched(3, "AI", 90);
        let script = template_script(&article);
        assert!(script.contains("Article 3"));
        assert!(script.contains("Source 3"));
        assert!(script.contains("Detailed summary 3."));
    }

    #[tokio::test]
    async fn script_falls_back_without_provider() {
        let a = enriched(0, "AI", 90);
        let b = enriched(1, "AI", 80);
        let featured = write_script(None, &RetryPolicy::once(), Some(&a), &[&a, &b]).await;
        assert_eq!(featured, template_script(&a));

        let digest = write_script(None, &RetryPolicy::once(), None, &[&a, &b]).await;
        assert!(digest.contains("Story 2: Article 1."));
    }

    #[tokio::test]
    async fn empty_script_is_rejected() {
        let tts = TtsClient::new("http://127.0.0.1:9", "key", 1).unwrap();
        let err = tts.synthesize("   ").await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}
