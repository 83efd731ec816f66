use newsforge::filter::{llm_relevance_filter, FilterTier, RelevanceOptions};
use newsforge::llm::remote::RemoteLlmProvider;
use newsforge::llm::LlmProvider;
use newsforge::retry::{Backoff, RetryPolicy};
use newsforge::RawArticle;

fn completion(content: &str) -> String {
    serde_json::json!({
        "model": "gpt-4o-mini",
        "choices": [{"message": {"role": "assistant", "content": content}}]
    })
    .to_string()
}

fn article(title: &str) -> RawArticle {
    RawArticle {
        source: "Wire".to_string(),
        title: title.to_string(),
        link: format!("https://news.example/{}", title.to_lowercase().replace(' ', "-")),
        summary: None,
        published_at: None,
        raw_content: None,
        image: None,
    }
}

fn options() -> RelevanceOptions {
    RelevanceOptions {
        min_score: 50,
        retry: RetryPolicy::new(1, Backoff::None),
        ..Default::default()
    }
}

fn titles(articles: &[RawArticle]) -> Vec<&str> {
    articles.iter().map(|a| a.title.as_str()).collect()
}

#[tokio::test]
async fn model_scores_rank_and_cap_the_articles() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_body(completion(
            r#"{"results": [
                {"index": 0, "score": 40},
                {"index": 1, "score": 60},
                {"index": 2, "score": 90},
                {"index": 4, "score": 75},
                {"index": 99, "score": 100}
            ]}"#,
        ))
        .expect(2)
        .create_async()
        .await;

    let articles: Vec<RawArticle> = ["Zero", "One", "Two", "Three", "Four", "Five"]
        .into_iter()
        .map(article)
        .collect();
    let remote = RemoteLlmProvider::new(server.url(), "k", "m");
    let provider: &dyn LlmProvider = &remote;

    let outcome = llm_relevance_filter(Some(provider), &articles, "anything", 2, &options()).await;
    assert_eq!(outcome.tier, FilterTier::Model);
    // highest score first, low scores and unknown indices dropped, capped at 2
    assert_eq!(titles(&outcome.articles), ["Two", "Four"]);

    let wider = llm_relevance_filter(Some(provider), &articles, "anything", 10, &options()).await;
    assert_eq!(titles(&wider.articles), ["Two", "Four", "One"]);
    mock.assert_async().await;
}

#[tokio::test]
async fn unreadable_model_answer_falls_back_to_fuzzy_titles() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_body(completion("I would rather not score these."))
        .create_async()
        .await;

    let articles = vec![
        article("Football results of the week"),
        article("Quantum computers scale up"),
        article("Quantum computing milestone"),
    ];
    let remote = RemoteLlmProvider::new(server.url(), "k", "m");
    let provider: &dyn LlmProvider = &remote;

    let outcome = llm_relevance_filter(Some(provider), &articles, "quantum computing", 5, &options()).await;
    assert_eq!(outcome.tier, FilterTier::Fuzzy);
    assert_eq!(
        titles(&outcome.articles),
        ["Quantum computing milestone", "Quantum computers scale up"]
    );
}
