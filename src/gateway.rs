//! Forwarding augmented prompts to an OpenAI-compatible chat completions API.
//!
//! [`CompletionBackend`] performs a single call. [`GenerationGateway`] wraps a
//! backend with a per-attempt timeout and retries throttled calls with
//! exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};

use crate::config::{LlmSettings, Secret};
use crate::error::RagError;
use crate::models::{ChatRequest, ChatResponse, Message};
use crate::rag::{AugmentedPrompt, GenerationResult};

#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub model_name: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl ModelConfig {
    pub fn from_settings(settings: &LlmSettings) -> Self {
        Self {
            model_name: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, prompt: &str, config: &ModelConfig) -> Result<GenerationResult, RagError>;
}

pub struct ChatCompletionsBackend {
    client: Client,
    base_url: String,
    api_key: Option<Secret>,
}

impl ChatCompletionsBackend {
    pub fn new(base_url: impl Into<String>, api_key: Option<Secret>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl CompletionBackend for ChatCompletionsBackend {
    async fn complete(&self, prompt: &str, config: &ModelConfig) -> Result<GenerationResult, RagError> {
        let key = self
            .api_key
            .as_ref()
            .ok_or_else(|| RagError::Auth("no API key configured".to_string()))?;

        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: config.model_name.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: config.temperature,
            max_tokens: Some(config.max_tokens),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(key.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RagError::Timeout {
                        operation: "generation",
                        after: Duration::ZERO,
                    }
                } else {
                    RagError::Generation(format!("request to {} failed: {}", url, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry = retry_after(response.headers());
            let error_text = response.text().await.unwrap_or_default();
            let message = format!("{} - {}", status, error_text);
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RagError::Auth(message),
                StatusCode::TOO_MANY_REQUESTS => RagError::RateLimit {
                    message,
                    retry_after: retry,
                },
                _ => RagError::Generation(message),
            });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| RagError::Generation(format!("malformed completion response: {}", e)))?;

        let model = chat_response.model;
        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Generation("no choices returned".to_string()))?;

        Ok(GenerationResult {
            text: choice.message.content,
            model,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &LlmSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
        }
    }

    /// Delay before retry number `attempt` (0-based): half the capped
    /// exponential step plus up to the same again in jitter.
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint.min(self.max_backoff);
        }
        let step = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_backoff);
        let half = step / 2;
        let jitter_ms = rand::rng().random_range(0..=half.as_millis() as u64);
        half + Duration::from_millis(jitter_ms)
    }
}

pub struct GenerationGateway {
    backend: Arc<dyn CompletionBackend>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
}

impl GenerationGateway {
    pub fn new(backend: Arc<dyn CompletionBackend>, retry: RetryPolicy, attempt_timeout: Duration) -> Self {
        Self {
            backend,
            retry,
            attempt_timeout,
        }
    }

    pub async fn generate(
        &self,
        prompt: &AugmentedPrompt,
        config: &ModelConfig,
    ) -> Result<GenerationResult, RagError> {
        let mut attempt = 0;
        loop {
            let outcome = tokio::time::timeout(self.attempt_timeout, self.backend.complete(&prompt.text, config))
                .await
                .unwrap_or_else(|_| Err(RagError::timeout("generation", self.attempt_timeout)));

            match outcome {
                Ok(result) => {
                    tracing::debug!(model = %result.model, attempt, "generation completed");
                    return Ok(result);
                }
                Err(RagError::Timeout { operation, .. }) => {
                    return Err(RagError::timeout(operation, self.attempt_timeout));
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff(attempt, e.retry_after());
                    tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying: {}", e);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
