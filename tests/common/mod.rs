#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use rag_gateway::error::RagError;
use rag_gateway::gateway::{CompletionBackend, GenerationGateway, ModelConfig, RetryPolicy};
use rag_gateway::rag::embeddings::Embedder;
use rag_gateway::rag::memory_store::InMemoryStore;
use rag_gateway::rag::vector_store::DocumentStore;
use rag_gateway::rag::{Chunk, GenerationResult, Retriever, ScoredChunk};
use rag_gateway::server::{router, AppState};
use rag_gateway::service::{RagService, ServiceDefaults};

pub const DIMS: usize = 64;

/// Bag-of-words embedder: each lowercase word is hashed into one bucket.
pub struct KeywordEmbedder {
    pub dims: usize,
    pub calls: Arc<AtomicUsize>,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self {
            dims: DIMS,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn bucket(&self, word: &str) -> usize {
        // FNV-1a
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in word.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash % self.dims as u64) as usize
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut vector = vec![0.0; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            vector[self.bucket(&word.to_lowercase())] += 1.0;
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Claims `DIMS` dimensions but returns fewer.
pub struct ShortEmbedder;

#[async_trait]
impl Embedder for ShortEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, RagError> {
        Ok(vec![1.0; DIMS - 1])
    }

    fn dimensions(&self) -> usize {
        DIMS
    }
}

/// In-memory store whose writes start failing after `fail_after` successes.
pub struct FlakyStore {
    pub inner: InMemoryStore,
    pub fail_after: usize,
    pub writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new(fail_after: usize) -> Self {
        Self {
            inner: InMemoryStore::new(DIMS),
            fail_after,
            writes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn write(&self, chunk: &Chunk) -> Result<(), RagError> {
        if self.writes.fetch_add(1, Ordering::SeqCst) >= self.fail_after {
            return Err(RagError::StoreWrite("connection reset".to_string()));
        }
        self.inner.write(chunk).await
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>, RagError> {
        self.inner.search(query, top_k).await
    }
}

/// Store whose searches never finish in time.
pub struct StalledStore;

#[async_trait]
impl DocumentStore for StalledStore {
    async fn write(&self, _chunk: &Chunk) -> Result<(), RagError> {
        Ok(())
    }

    async fn search(&self, _query: &[f32], _top_k: usize) -> Result<Vec<ScoredChunk>, RagError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }
}

/// Store whose backend is down.
pub struct UnreachableStore;

#[async_trait]
impl DocumentStore for UnreachableStore {
    async fn write(&self, _chunk: &Chunk) -> Result<(), RagError> {
        Err(RagError::StoreWrite("connection refused".to_string()))
    }

    async fn search(&self, _query: &[f32], _top_k: usize) -> Result<Vec<ScoredChunk>, RagError> {
        Err(RagError::StoreRead("connection refused (10.0.0.7:6334)".to_string()))
    }
}

/// Completion backend that records prompts and answers from a fixed outcome.
pub struct RecordingBackend {
    pub prompts: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
    pub delay: Duration,
    pub outcome: fn() -> Result<GenerationResult, RagError>,
}

impl RecordingBackend {
    pub fn answering(delay: Duration) -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay,
            outcome: || {
                Ok(GenerationResult {
                    text: "fn main() {}".to_string(),
                    model: "gpt-test".to_string(),
                })
            },
        }
    }

    pub fn failing(outcome: fn() -> Result<GenerationResult, RagError>) -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            outcome,
        }
    }
}

#[async_trait]
impl CompletionBackend for RecordingBackend {
    async fn complete(&self, prompt: &str, _config: &ModelConfig) -> Result<GenerationResult, RagError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().await.push(prompt.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.outcome)()
    }
}

pub fn model_config() -> ModelConfig {
    ModelConfig {
        model_name: "gpt-test".to_string(),
        max_tokens: 256,
        temperature: None,
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

pub fn build_app(
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn DocumentStore>,
    backend: Arc<dyn CompletionBackend>,
    attempt_timeout: Duration,
    request_timeout: Duration,
) -> Router {
    let retriever = Retriever::new(embedder, store, Duration::from_secs(1), Duration::from_millis(200));
    let gateway = GenerationGateway::new(backend, fast_retry(), attempt_timeout);
    let defaults = ServiceDefaults {
        top_k: 5,
        max_top_k: 20,
        model: model_config(),
        request_timeout,
    };
    router(Arc::new(AppState {
        service: RagService::new(retriever, gateway, defaults),
    }))
}

pub fn completion(text: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "model": "gpt-test",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": text },
            "finish_reason": "stop"
        }]
    })
}

/// Fake OpenAI-style endpoint replaying scripted responses.
///
/// The last scripted response repeats once the others are used up.
pub struct ScriptedChat {
    pub responses: Mutex<VecDeque<(u16, Value)>>,
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<(Option<String>, Value)>>,
    pub delay: Duration,
}

impl ScriptedChat {
    pub fn new(responses: Vec<(u16, Value)>) -> Arc<Self> {
        Self::delayed(responses, Duration::ZERO)
    }

    pub fn delayed(responses: Vec<(u16, Value)>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

async fn scripted_handler(
    State(chat): State<Arc<ScriptedChat>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    chat.calls.fetch_add(1, Ordering::SeqCst);
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    chat.requests.lock().await.push((auth, body));

    if !chat.delay.is_zero() {
        tokio::time::sleep(chat.delay).await;
    }

    let (status, body) = {
        let mut queue = chat.responses.lock().await;
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap()
        }
    };

    let mut response = (StatusCode::from_u16(status).unwrap(), Json(body)).into_response();
    if status == 429 {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from_static("0"));
    }
    response
}

/// Serves `chat` on an ephemeral port and returns its base URL.
pub async fn spawn_chat_server(chat: Arc<ScriptedChat>) -> String {
    let app = Router::new()
        .route("/v1/chat/completions", post(scripted_handler))
        .with_state(chat);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/v1", addr)
}

/// Serves `chat` as an `/embeddings` endpoint and returns its base URL.
pub async fn spawn_embeddings_server(chat: Arc<ScriptedChat>) -> String {
    let app = Router::new()
        .route("/v1/embeddings", post(scripted_handler))
        .with_state(chat);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/v1", addr)
}
