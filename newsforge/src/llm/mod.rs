use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use common::{secret_from_env, LlmConfig};

use crate::error::PipelineError;
use crate::retry::{Backoff, RetryPolicy};

pub mod fallback;
pub mod remote;

/// Core trait for chat-completion providers
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for a given request
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse>;

    /// Model identifier, for logs
    fn model(&self) -> &str;
}

/// Request structure for LLM generation
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub timeout_seconds: Option<u64>,
    /// Ask the provider for a JSON object response
    pub json_mode: bool,
}

impl LlmRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Response from LLM generation
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: UsageMetadata,
    pub model: String,
}

/// Token usage metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Run `request` under `policy`; exhaustion becomes `PipelineError::ModelCall`.
pub async fn generate_with_retry(
    provider: &dyn LlmProvider,
    request: LlmRequest,
    policy: &RetryPolicy,
    label: &str,
) -> std::result::Result<LlmResponse, PipelineError> {
    policy
        .run(label, |_| provider.generate(request.clone()))
        .await
        .map_err(|e| PipelineError::ModelCall {
            attempts: e.attempts,
            reason: format!("{:#}", e.last),
        })
}

/// Retry policy for model calls from the `[llm]` section (default: 2 attempts, 2s linear).
pub fn retry_policy(config: Option<&LlmConfig>) -> RetryPolicy {
    let default = RetryPolicy::model_calls();
    let Some(cfg) = config else {
        return default;
    };
    let attempts = cfg.max_attempts.unwrap_or(default.max_attempts);
    let backoff = match cfg.backoff_seconds {
        Some(0) => Backoff::None,
        Some(secs) => Backoff::Linear(std::time::Duration::from_secs(secs)),
        None => default.backoff,
    };
    RetryPolicy::new(attempts, backoff)
}

/// Build the configured provider. `Ok(None)` means the pipeline runs on fallbacks only.
pub fn provider_from_config(config: Option<&LlmConfig>) -> Result<Option<Arc<dyn LlmProvider>>> {
    let Some(llm_config) = config else {
        return Ok(None);
    };
    let adapter = llm_config.adapter.as_deref().unwrap_or("remote");
    match adapter {
        "none" => Ok(None),
        "remote" => {
            let remote_config = llm_config
                .remote
                .as_ref()
                .context("Remote adapter selected but no [llm.remote] section found")?;

            // Fetch API key from env var
            let api_key_env = remote_config
                .api_key_env
                .as_deref()
                .context("Missing api_key_env in remote config")?;
            let api_key = secret_from_env(Some(api_key_env))
                .with_context(|| format!("LLM API key env var '{}' not set", api_key_env))?;

            let model = remote_config.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
            let api_url = remote_config
                .api_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string());

            info!(model = %model, url = %api_url, "LLM provider initialized");
            let provider = remote::RemoteLlmProvider::new(api_url, api_key, model).with_defaults(
                remote_config.timeout_seconds.unwrap_or(30),
                remote_config.max_tokens.unwrap_or(800),
                remote_config.temperature.unwrap_or(0.3),
            );
            Ok(Some(Arc::new(provider)))
        }
        _ => anyhow::bail!("Unknown LLM adapter type: {}", adapter),
    }
}

/// Helper to extract JSON from text that might contain markdown backticks or preamble
pub fn extract_json_from_text(text: &str) -> Option<String> {
    // 1. Try to find content between ```json and ```
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }

    // 2. Try to find content between ``` and ```
    if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }

    // 3. Outermost object or array, whichever opens first
    let open = text.find(['{', '[']);
    if let Some(start) = open {
        let closer = if text[start..].starts_with('{') { '}' } else { ']' };
        if let Some(end) = text.rfind(closer) {
            if end > start {
                return Some(text[start..=end].to_string());
            }
        }
    }

    None
}

/// `extract_json_from_text` followed by a parse into a JSON value.
pub fn parse_json_value(text: &str) -> Option<serde_json::Value> {
    let candidate = extract_json_from_text(text)?;
    serde_json::from_str(&candidate).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_json() {
        let text = "Sure!\n```json\n{\"a\": 1}\n```\nanything else?";
        assert_eq!(extract_json_from_text(text).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn extracts_object_with_preamble() {
        let text = "Here you go: {\"selected_indices\": [1, 2], \"featured_index\": 2} hope it helps";
        let v = parse_json_value(text).unwrap();
        assert_eq!(v["featured_index"], 2);
    }

    #[test]
    fn extracts_top_level_array() {
        let text = "[{\"index\": 0, \"score\": 90}, {\"index\": 3, \"score\": 40}]";
        let v = parse_json_value(text).unwrap();
        assert_eq!(v.as_array().unwrap().len(), 2);
    }

    #[test]
    fn nothing_to_extract() {
        assert!(extract_json_from_text("no structured data here").is_none());
        assert!(parse_json_value("{ not json }").is_none());
    }

    #[test]
    fn retry_policy_from_config() {
        let cfg = LlmConfig {
            adapter: Some("none".into()),
            remote: None,
            max_attempts: Some(4),
            backoff_seconds: Some(0),
        };
        let policy = retry_policy(Some(&cfg));
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.backoff, Backoff::None);
        assert_eq!(retry_policy(None), RetryPolicy::model_calls());
    }

    #[test]
    fn none_adapter_builds_no_provider() {
        let cfg = LlmConfig {
            adapter: Some("none".into()),
            remote: None,
            max_attempts: None,
            backoff_seconds: None,
        };
        assert!(provider_from_config(Some(&cfg)).unwrap().is_none());
        assert!(provider_from_config(None).unwrap().is_none());

        let bad = LlmConfig { adapter: Some("local".into()), ..cfg };
        assert!(provider_from_config(Some(&bad)).is_err());
    }
}
