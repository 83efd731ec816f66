use newsforge::llm::remote::RemoteLlmProvider;
use newsforge::llm::{generate_with_retry, LlmProvider, LlmRequest};
use newsforge::retry::{Backoff, RetryPolicy};
use newsforge::PipelineError;

fn completion(content: &str) -> String {
    serde_json::json!({
        "model": "gpt-4o-mini",
        "choices": [{
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    })
    .to_string()
}

#[tokio::test]
async fn test_remote_provider_with_mock() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .match_header("authorization", "Bearer fake-api-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(completion("This is a test response"))
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");

    let request = LlmRequest::new("Test prompt").max_tokens(100).temperature(0.7);
    let response = provider.generate(request).await.unwrap();

    assert_eq!(response.content, "This is a test response");
    assert_eq!(response.usage.prompt_tokens, 10);
    assert_eq!(response.usage.completion_tokens, 5);
    assert_eq!(response.usage.total_tokens, 15);
    assert_eq!(response.model, "gpt-4o-mini");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_json_mode_is_requested() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .match_body(mockito::Matcher::PartialJson(serde_json::json!({
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "give json"}
            ]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(completion("{\"ok\": true}"))
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "k", "gpt-4o-mini");
    let response = provider
        .generate(LlmRequest::new("give json").system("be terse").json())
        .await
        .unwrap();
    assert_eq!(response.content, "{\"ok\": true}");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_provider_error_handling() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .with_status(429)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error": {"message": "Rate limit exceeded"}}"#)
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");

    let err = provider.generate(LlmRequest::new("Test")).await.unwrap_err();
    assert!(err.to_string().contains("429"));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_two_attempts_then_model_call_error() {
    let mut server = mockito::Server::new_async().await;

    // a third request would make `expect(2)` fail
    let mock = server
        .mock("POST", "/")
        .with_status(500)
        .with_body("upstream exploded")
        .expect(2)
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "k", "gpt-4o-mini");
    let policy = RetryPolicy::new(2, Backoff::None);

    let err = generate_with_retry(&provider, LlmRequest::new("hi"), &policy, "test call")
        .await
        .unwrap_err();
    match err {
        PipelineError::ModelCall { attempts, reason } => {
            assert_eq!(attempts, 2);
            assert!(reason.contains("500"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_provider_timeout() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(std::time::Duration::from_secs(3));
            w.write_all(b"too late")
        })
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");

    let request = LlmRequest {
        prompt: "Test".to_string(),
        timeout_seconds: Some(1),
        ..Default::default()
    };

    let started = std::time::Instant::now();
    let err = provider.generate(request).await.unwrap_err();
    assert!(err.to_string().contains("timed out"), "unexpected error: {err:#}");
    // headers arrive at once; the stalled body must still be bounded
    assert!(started.elapsed() < std::time::Duration::from_millis(2500));
}
