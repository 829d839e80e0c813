mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{completion, fast_retry, model_config, spawn_chat_server, ScriptedChat};
use rag_gateway::config::Secret;
use rag_gateway::error::ErrorKind;
use rag_gateway::gateway::{ChatCompletionsBackend, GenerationGateway, RetryPolicy};
use rag_gateway::rag::AugmentedPrompt;

fn prompt(text: &str) -> AugmentedPrompt {
    AugmentedPrompt {
        text: text.to_string(),
        context_chunks: 1,
    }
}

async fn gateway_for(chat: Arc<ScriptedChat>, retry: RetryPolicy, attempt_timeout: Duration) -> GenerationGateway {
    let base_url = spawn_chat_server(chat).await;
    let backend = ChatCompletionsBackend::new(base_url, Some(Secret::new("sk-test")), Duration::from_secs(5)).unwrap();
    GenerationGateway::new(Arc::new(backend), retry, attempt_timeout)
}

#[tokio::test]
async fn test_forwards_prompt_and_returns_completion() {
    let chat = ScriptedChat::new(vec![(200, completion("package main"))]);
    let gateway = gateway_for(chat.clone(), fast_retry(), Duration::from_secs(5)).await;

    let result = gateway
        .generate(&prompt("context\nWrite a server"), &model_config())
        .await
        .unwrap();
    assert_eq!(result.text, "package main");
    assert_eq!(result.model, "gpt-test");

    let requests = chat.requests.lock().await;
    let (auth, body) = &requests[0];
    assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
    assert_eq!(body["model"], "gpt-test");
    assert_eq!(body["max_tokens"], 256);
    assert_eq!(body["messages"][0]["role"], "user");
    assert_eq!(body["messages"][0]["content"], "context\nWrite a server");
    assert!(body.get("temperature").is_none());
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let throttled = json!({ "error": { "message": "Rate limit reached" } });
    let chat = ScriptedChat::new(vec![
        (429, throttled.clone()),
        (429, throttled),
        (200, completion("ok")),
    ]);
    let gateway = gateway_for(chat.clone(), fast_retry(), Duration::from_secs(5)).await;

    let result = gateway.generate(&prompt("p"), &model_config()).await.unwrap();
    assert_eq!(result.text, "ok");
    assert_eq!(chat.calls(), 3);
}

#[tokio::test]
async fn test_rate_limit_retries_are_bounded() {
    let chat = ScriptedChat::new(vec![(429, json!({ "error": "slow down" }))]);
    let retry = RetryPolicy {
        max_retries: 2,
        ..fast_retry()
    };
    let gateway = gateway_for(chat.clone(), retry, Duration::from_secs(5)).await;

    let err = gateway.generate(&prompt("p"), &model_config()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimitError);
    assert_eq!(chat.calls(), 3);
}

#[tokio::test]
async fn test_unauthorized_is_auth_error_without_retry() {
    let chat = ScriptedChat::new(vec![(401, json!({ "error": "invalid api key" }))]);
    let gateway = gateway_for(chat.clone(), fast_retry(), Duration::from_secs(5)).await;

    let err = gateway.generate(&prompt("p"), &model_config()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthError);
    assert_eq!(chat.calls(), 1);
}

#[tokio::test]
async fn test_server_error_is_generation_error_without_retry() {
    let chat = ScriptedChat::new(vec![(500, json!({ "error": "overloaded" }))]);
    let gateway = gateway_for(chat.clone(), fast_retry(), Duration::from_secs(5)).await;

    let err = gateway.generate(&prompt("p"), &model_config()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::GenerationError);
    assert_eq!(chat.calls(), 1);
}

#[tokio::test]
async fn test_empty_choices_is_generation_error() {
    let chat = ScriptedChat::new(vec![(200, json!({ "id": "x", "model": "gpt-test", "choices": [] }))]);
    let gateway = gateway_for(chat, fast_retry(), Duration::from_secs(5)).await;

    let err = gateway.generate(&prompt("p"), &model_config()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::GenerationError);
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let chat = ScriptedChat::delayed(vec![(200, completion("late"))], Duration::from_secs(2));
    let gateway = gateway_for(chat, fast_retry(), Duration::from_millis(100)).await;

    let err = gateway.generate(&prompt("p"), &model_config()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TimeoutError);
}
