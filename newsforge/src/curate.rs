use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::llm::fallback::truncate;
use crate::llm::{generate_with_retry, parse_json_value, LlmProvider, LlmRequest};
use crate::models::{EnrichedArticle, SelectionResult};
use crate::retry::RetryPolicy;

pub const DEFAULT_MAX_SELECTED: usize = 10;
pub const DEFAULT_FALLBACK_COUNT: usize = 5;

const SYSTEM_PROMPT: &str = r#"You are the editor of a technology news digest.
Pick the most relevant articles, avoid near-duplicates, and choose one featured
article for the audio capsule. Answer with ONE strictly valid JSON object:
{"selected_indices": [0, 2, 4], "featured_index": 2}
No text before or after the JSON."#;

/// Chooses the curated subset and the featured article. Never fails.
pub struct Curator {
    provider: Option<Arc<dyn LlmProvider>>,
    retry: RetryPolicy,
    max_selected: usize,
    fallback_count: usize,
}

impl Curator {
    pub fn new(provider: Option<Arc<dyn LlmProvider>>) -> Self {
        Self {
            provider,
            retry: RetryPolicy::model_calls(),
            max_selected: DEFAULT_MAX_SELECTED,
            fallback_count: DEFAULT_FALLBACK_COUNT,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_limits(mut self, max_selected: usize, fallback_count: usize) -> Self {
        self.max_selected = max_selected.max(1);
        self.fallback_count = fallback_count.max(1);
        self
    }

    fn build_prompt(&self, articles: &[EnrichedArticle]) -> String {
        let listing = articles
            .iter()
            .enumerate()
            .map(|(i, a)| {
                format!(
                    "[{}] {} | topic: {} | score: {} | {}",
                    i,
                    a.title(),
                    a.topic,
                    a.relevance_score,
                    truncate(&a.short_summary, 200)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "Indexed articles:\n{}\n\nSelect at most {} articles and one featured_index among them.",
            listing, self.max_selected
        )
    }

    pub async fn select(&self, articles: &[EnrichedArticle]) -> SelectionResult {
        if articles.is_empty() {
            info!("No article to select from");
            return SelectionResult::default();
        }
        let fallback_count = self.fallback_count.min(self.max_selected);
        let fallback = || SelectionResult::first_n(articles.len(), fallback_count);

        let Some(provider) = self.provider.as_deref() else {
            info!("No LLM provider, using the first {} articles", fallback_count.min(articles.len()));
            return fallback();
        };

        let request = LlmRequest::new(self.build_prompt(articles))
            .system(SYSTEM_PROMPT)
            .json()
            .temperature(0.2)
            .max_tokens(300);

        let response = match generate_with_retry(provider, request, &self.retry, "selection").await {
            Ok(r) => r,
            Err(e) => {
                warn!("Selection model call failed, using fallback: {}", e);
                return fallback();
            }
        };

        match parse_json_value(&response.content) {
            Some(value @ Value::Object(_)) => {
                let selection = validate_selection(&value, articles.len(), self.max_selected, self.fallback_count);
                info!(
                    selected = selection.selected_indices.len(),
                    featured = ?selection.featured_index,
                    "selection ready"
                );
                selection
            }
            _ => {
                warn!("Selection answer is not a JSON object, using fallback");
                fallback()
            }
        }
    }
}

/// Turn a model answer into a selection that always satisfies
/// `featured ∈ selected ⊆ [0, len)` and `selected.len() <= max_selected`.
pub fn validate_selection(value: &Value, len: usize, max_selected: usize, fallback_count: usize) -> SelectionResult {
    if len == 0 {
        return SelectionResult::default();
    }

    let mut seen = HashSet::new();
    let mut selected: Vec<usize> = value
        .get("selected_indices")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_u64)
                .map(|i| i as usize)
                .filter(|&i| i < len && seen.insert(i))
                .collect()
        })
        .unwrap_or_default();
    selected.truncate(max_selected);

    if selected.is_empty() {
        let count = fallback_count.min(max_selected).min(len);
        warn!("No valid index in the selection answer, using the first {}", count);
        selected = (0..count).collect();
    }

    let featured = value
        .get("featured_index")
        .and_then(Value::as_u64)
        .map(|i| i as usize)
        .filter(|i| selected.contains(i))
        .or_else(|| selected.first().copied());

    SelectionResult {
        selected_indices: selected,
        featured_index: featured,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(sel: &SelectionResult, len: usize, max: usize) {
        assert!(sel.selected_indices.len() <= max);
        assert!(sel.selected_indices.iter().all(|&i| i < len));
        let f = sel.featured_index.expect("featured");
        assert!(sel.selected_indices.contains(&f));
    }

    #[test]
    fn valid_answer_is_kept() {
        let sel = validate_selection(&json!({"selected_indices": [3, 1, 4], "featured_index": 1}), 6, 10, 5);
        assert_eq!(sel.selected_indices, vec![3, 1, 4]);
        assert_eq!(sel.featured_index, Some(1));
    }

    #[test]
    fn out_of_range_only_falls_back_to_first_five() {
        let sel = validate_selection(&json!({"selected_indices": [999], "featured_index": 999}), 8, 10, 5);
        assert_eq!(sel.selected_indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(sel.featured_index, Some(0));

        let small = validate_selection(&json!({"selected_indices": [999]}), 3, 10, 5);
        assert_eq!(small.selected_indices, vec![0, 1, 2]);
    }

    #[test]
    fn junk_indices_are_dropped() {
        let sel = validate_selection(
            &json!({"selected_indices": [2, "3", 2, -1, 1.5, 0, 7], "featured_index": 7}),
            5,
            10,
            5,
        );
        assert_eq!(sel.selected_indices, vec![2, 0]);
        assert_eq!(sel.featured_index, Some(2));
        check(&sel, 5, 10);
    }

    #[test]
    fn selection_is_truncated_to_max() {
        let many: Vec<usize> = (0..30).collect();
        let sel = validate_selection(&json!({"selected_indices": many, "featured_index": 25}), 30, 10, 5);
        assert_eq!(sel.selected_indices.len(), 10);
        // 25 was cut off by truncation
        assert_eq!(sel.featured_index, Some(0));
        check(&sel, 30, 10);
    }

    #[test]
    fn arbitrary_answers_keep_invariants() {
        let answers = [
            json!({}),
            json!({"selected_indices": null}),
            json!({"selected_indices": [1, 1, 1], "featured_index": "1"}),
            json!({"selected_indices": [4, 3, 2, 1, 0], "featured_index": 3}),
            json!({"featured_index": 2}),
        ];
        for answer in answers {
            for len in 1..8 {
                let sel = validate_selection(&answer, len, 3, 5);
                check(&sel, len, 3);
            }
        }
    }

    #[tokio::test]
    async fn no_provider_and_empty_input() {
        let curator = Curator::new(None);
        assert_eq!(curator.select(&[]).await, SelectionResult::default());
    }
}
