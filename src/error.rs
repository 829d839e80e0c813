use std::fmt;
use std::time::Duration;

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Errors raised by the ingestion, retrieval and generation stages.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("document store read failed: {0}")]
    StoreRead(String),

    #[error("document store write failed: {0}")]
    StoreWrite(String),

    #[error("generation backend rejected credentials: {0}")]
    Auth(String),

    #[error("generation backend throttled the request: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl RagError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RagError::Validation(_) => ErrorKind::ValidationError,
            RagError::Embedding(_) => ErrorKind::EmbeddingError,
            RagError::StoreRead(_) => ErrorKind::StoreReadError,
            RagError::StoreWrite(_) => ErrorKind::StoreWriteError,
            RagError::Auth(_) => ErrorKind::AuthError,
            RagError::RateLimit { .. } => ErrorKind::RateLimitError,
            RagError::Generation(_) => ErrorKind::GenerationError,
            RagError::Timeout { .. } => ErrorKind::TimeoutError,
        }
    }

    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        RagError::Timeout { operation, after }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, RagError::RateLimit { .. })
    }

    /// Delay requested by the backend, if it sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RagError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Error taxonomy exposed to callers of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    ValidationError,
    EmbeddingError,
    StoreReadError,
    StoreWriteError,
    AuthError,
    RateLimitError,
    GenerationError,
    TimeoutError,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
            ErrorKind::TimeoutError => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    /// Message returned to callers. Backend details only go to the logs.
    pub fn public_message(self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "request is invalid",
            ErrorKind::EmbeddingError => "could not embed the prompt",
            ErrorKind::StoreReadError => "document store is unavailable",
            ErrorKind::StoreWriteError => "document store rejected the write",
            ErrorKind::AuthError => "generation backend rejected the service credentials",
            ErrorKind::RateLimitError => "generation backend is rate limiting requests",
            ErrorKind::GenerationError => "generation backend failed",
            ErrorKind::TimeoutError => "upstream call timed out",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Request lifecycle of `POST /generate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Received,
    Retrieving,
    Augmenting,
    Generating,
    Completed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A [`RagError`] tagged with the request stage that produced it.
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: RagError,
}

impl StageError {
    pub fn new(stage: Stage, source: RagError) -> Self {
        Self { stage, source }
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

impl IntoResponse for StageError {
    fn into_response(self) -> axum::response::Response {
        let kind = self.kind();
        tracing::error!(stage = %self.stage, kind = %kind, error = %self.source, "request failed");

        let message = match &self.source {
            // Validation messages describe the caller's own input.
            RagError::Validation(msg) => msg.clone(),
            _ => kind.public_message().to_string(),
        };

        let body = Json(json!({
            "error": {
                "stage": self.stage,
                "kind": kind,
                "message": message,
            }
        }));
        (kind.status(), body).into_response()
    }
}

/// Ingestion failure. `committed` holds the chunks persisted before it.
#[derive(Debug, Error)]
#[error("ingestion of document {document_id} failed after {} committed chunks: {source}", committed.len())]
pub struct IngestError {
    pub document_id: String,
    pub committed: Vec<String>,
    #[source]
    pub source: RagError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorKind::ValidationError.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::TimeoutError.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(ErrorKind::AuthError.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(ErrorKind::RateLimitError.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(ErrorKind::StoreReadError.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_kind_serializes_to_taxonomy_name() {
        let value = serde_json::to_value(ErrorKind::StoreReadError).unwrap();
        assert_eq!(value, json!("StoreReadError"));
        let value = serde_json::to_value(Stage::Generating).unwrap();
        assert_eq!(value, json!("Generating"));
    }

    #[test]
    fn test_only_rate_limit_is_retryable() {
        let throttled = RagError::RateLimit {
            message: "slow down".into(),
            retry_after: None,
        };
        assert!(throttled.is_retryable());
        assert!(!RagError::Generation("boom".into()).is_retryable());
        assert!(!RagError::timeout("generation", Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn test_retry_after_only_from_rate_limit() {
        let throttled = RagError::RateLimit {
            message: "slow down".into(),
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(throttled.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(RagError::Generation("boom".into()).retry_after(), None);
    }

    #[tokio::test]
    async fn test_response_hides_backend_cause() {
        let err = StageError::new(
            Stage::Generating,
            RagError::Auth("401 invalid key sk-live-abc".into()),
        );
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["stage"], "Generating");
        assert_eq!(body["error"]["kind"], "AuthError");
        assert!(!body.to_string().contains("sk-live-abc"));
    }
}
