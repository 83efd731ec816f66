// Free-text generation with deterministic fallbacks
use tracing::{info, warn};

use super::{generate_with_retry, LlmProvider, LlmRequest};
use crate::retry::RetryPolicy;

/// Model-written text, or `fallback()` when there is no provider, the call keeps
/// failing, or the model answers with nothing.
pub async fn generate_or_else<F>(
    provider: Option<&dyn LlmProvider>,
    request: LlmRequest,
    policy: &RetryPolicy,
    label: &str,
    fallback: F,
) -> String
where
    F: FnOnce() -> String,
{
    let Some(provider) = provider else {
        return fallback();
    };
    match generate_with_retry(provider, request, policy, label).await {
        Ok(response) if !response.content.trim().is_empty() => {
            info!(
                "{} generated by {}: {} chars, {} tokens",
                label,
                response.model,
                response.content.len(),
                response.usage.total_tokens
            );
            response.content.trim().to_string()
        }
        Ok(_) => {
            warn!("{}: empty model output, using fallback text", label);
            fallback()
        }
        Err(e) => {
            warn!("{}: {}, using fallback text", label, e);
            fallback()
        }
    }
}

/// First sentence of `text`, cut to `max_chars`.
pub fn extractive_summary(text: &str, max_chars: usize) -> String {
    let first = text
        .split(['.', '!', '?'])
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .unwrap_or("");
    let sentence = if first.chars().count() < text.trim().chars().count() && !first.is_empty() {
        format!("{}.", first)
    } else {
        first.to_string()
    };
    truncate(&sentence, max_chars)
}

/// Truncate on a char boundary, marking the cut with "...".
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept.trim_end())
    }
}
