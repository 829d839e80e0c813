use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{RagError, Stage, StageError};
use crate::gateway::{GenerationGateway, ModelConfig};
use crate::models::GenerateRequest;
use crate::rag::{augment, GenerationResult, Retriever};

/// Fallbacks applied to fields a request leaves out.
#[derive(Debug, Clone)]
pub struct ServiceDefaults {
    pub top_k: usize,
    pub max_top_k: usize,
    pub model: ModelConfig,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub prompt: String,
    pub top_k: usize,
    pub model: ModelConfig,
}

/// Runs retrieve, augment and generate for one request.
pub struct RagService {
    retriever: Retriever,
    gateway: GenerationGateway,
    defaults: ServiceDefaults,
}

impl RagService {
    pub fn new(retriever: Retriever, gateway: GenerationGateway, defaults: ServiceDefaults) -> Self {
        Self {
            retriever,
            gateway,
            defaults,
        }
    }

    pub fn validate(&self, request: GenerateRequest) -> Result<ValidatedRequest, StageError> {
        let invalid = |msg: String| StageError::new(Stage::Received, RagError::Validation(msg));

        let prompt = match request.prompt {
            Some(p) if !p.trim().is_empty() => p,
            Some(_) => return Err(invalid("prompt must not be empty".to_string())),
            None => return Err(invalid("prompt is required".to_string())),
        };

        let top_k = request.top_k.unwrap_or(self.defaults.top_k);
        if top_k == 0 || top_k > self.defaults.max_top_k {
            return Err(invalid(format!(
                "top_k must be between 1 and {}",
                self.defaults.max_top_k
            )));
        }

        let mut model = self.defaults.model.clone();
        if let Some(overrides) = request.model_config {
            if let Some(name) = overrides.model_name {
                if name.trim().is_empty() {
                    return Err(invalid("model_config.model_name must not be empty".to_string()));
                }
                model.model_name = name;
            }
            if let Some(max_tokens) = overrides.max_tokens {
                if max_tokens == 0 {
                    return Err(invalid("model_config.max_tokens must be greater than zero".to_string()));
                }
                model.max_tokens = max_tokens;
            }
            if let Some(temperature) = overrides.temperature {
                if !(0.0..=2.0).contains(&temperature) {
                    return Err(invalid("model_config.temperature must be between 0 and 2".to_string()));
                }
                model.temperature = Some(temperature);
            }
        }

        Ok(ValidatedRequest { prompt, top_k, model })
    }

    /// Validates the request, then runs every stage in order.
    ///
    /// All stages share one deadline. When it passes, the stage that was
    /// running is reported with a timeout.
    pub async fn handle(&self, request: GenerateRequest) -> Result<GenerationResult, StageError> {
        let request = self.validate(request)?;
        let deadline = Instant::now() + self.defaults.request_timeout;

        tracing::debug!(stage = %Stage::Retrieving, top_k = request.top_k, "stage started");
        let retrieved = self
            .run_stage(Stage::Retrieving, deadline, self.retriever.retrieve(&request.prompt, request.top_k))
            .await?;

        tracing::debug!(stage = %Stage::Augmenting, context_chunks = retrieved.len(), "stage started");
        let prompt = augment(&retrieved, &request.prompt);

        tracing::debug!(stage = %Stage::Generating, model = %request.model.model_name, "stage started");
        let result = self
            .run_stage(Stage::Generating, deadline, self.gateway.generate(&prompt, &request.model))
            .await?;

        tracing::info!(
            stage = %Stage::Completed,
            context_chunks = prompt.context_chunks,
            model = %result.model,
            "request completed"
        );
        Ok(result)
    }

    async fn run_stage<T>(
        &self,
        stage: Stage,
        deadline: Instant,
        fut: impl Future<Output = Result<T, RagError>>,
    ) -> Result<T, StageError> {
        match tokio::time::timeout_at(deadline, fut).await {
            Ok(outcome) => outcome.map_err(|e| StageError::new(stage, e)),
            Err(_) => Err(StageError::new(
                stage,
                RagError::timeout("request", self.defaults.request_timeout),
            )),
        }
    }
}
