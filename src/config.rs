use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "rag-gateway.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub store: StoreSettings,
    pub embedder: EmbedderSettings,
    pub llm: LlmSettings,
    pub retrieval: RetrievalSettings,
    pub chunking: ChunkingSettings,
    pub timeouts: TimeoutSettings,
    pub secrets: SecretSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Qdrant,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub url: String,
    pub collection: String,
    /// Name looked up in the secret provider, if the store needs a key.
    pub api_key_secret: Option<String>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Qdrant,
            url: "http://localhost:6334".to_string(),
            collection: "documents".to_string(),
            api_key_secret: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderBackend {
    Fastembed,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbedderSettings {
    pub backend: EmbedderBackend,
    pub model_dir: PathBuf,
    pub endpoint: String,
    pub model: String,
    /// Output size of the model. Left unset, it is inferred from the backend
    /// and model name.
    pub dimensions: Option<usize>,
    pub api_key_secret: Option<String>,
}

impl Default for EmbedderSettings {
    fn default() -> Self {
        Self {
            backend: EmbedderBackend::Fastembed,
            model_dir: PathBuf::from("/app/models/bge-small-en-v1.5"),
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: None,
            api_key_secret: Some("OPENAI_API_KEY".to_string()),
        }
    }
}

impl EmbedderSettings {
    /// Configured dimensions, or the known output size of the selected model.
    pub fn dimensions(&self) -> Result<usize> {
        if let Some(dims) = self.dimensions {
            return Ok(dims);
        }
        let known = match self.backend {
            // bge-small-en-v1.5
            EmbedderBackend::Fastembed => Some(384),
            EmbedderBackend::Http => match self.model.as_str() {
                "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
                "text-embedding-3-large" => Some(3072),
                _ => None,
            },
        };
        known.ok_or_else(|| {
            anyhow::anyhow!(
                "embedder.dimensions must be set for embedding model '{}'",
                self.model
            )
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub api_key_secret: String,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4-1106-preview".to_string(),
            max_tokens: 2048,
            temperature: None,
            api_key_secret: "OPENAI_API_KEY".to_string(),
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub max_top_k: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_top_k: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub embed_ms: u64,
    pub store_ms: u64,
    pub generation_ms: u64,
    pub request_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            embed_ms: 10_000,
            store_ms: 5_000,
            generation_ms: 60_000,
            request_ms: 120_000,
        }
    }
}

impl TimeoutSettings {
    pub fn embed(&self) -> Duration {
        Duration::from_millis(self.embed_ms)
    }

    pub fn store(&self) -> Duration {
        Duration::from_millis(self.store_ms)
    }

    pub fn generation(&self) -> Duration {
        Duration::from_millis(self.generation_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretProviderKind {
    Env,
    File,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecretSettings {
    pub provider: SecretProviderKind,
    pub dir: PathBuf,
}

impl Default for SecretSettings {
    fn default() -> Self {
        Self {
            provider: SecretProviderKind::Env,
            dir: PathBuf::from("/run/secrets"),
        }
    }
}

impl Settings {
    /// Loads `.env`, the optional TOML file and `RAG_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("RAG_CONFIG").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let settings: Settings = config::Config::builder()
            .add_source(config::File::from(path.as_path()).required(false))
            .add_source(
                config::Environment::with_prefix("RAG")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?
            .try_deserialize()
            .context("Invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            anyhow::bail!("chunking.chunk_size must be greater than zero");
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            anyhow::bail!(
                "chunking.overlap ({}) must be less than chunking.chunk_size ({})",
                self.chunking.overlap,
                self.chunking.chunk_size
            );
        }
        if self.retrieval.top_k == 0 {
            anyhow::bail!("retrieval.top_k must be greater than zero");
        }
        if self.retrieval.top_k > self.retrieval.max_top_k {
            anyhow::bail!(
                "retrieval.top_k ({}) exceeds retrieval.max_top_k ({})",
                self.retrieval.top_k,
                self.retrieval.max_top_k
            );
        }
        if self.embedder.dimensions()? == 0 {
            anyhow::bail!("embedder.dimensions must be greater than zero");
        }
        let t = &self.timeouts;
        if t.embed_ms == 0 || t.store_ms == 0 || t.generation_ms == 0 || t.request_ms == 0 {
            anyhow::bail!("timeouts must all be greater than zero");
        }
        Ok(())
    }

    pub fn secret_provider(&self) -> Box<dyn SecretProvider> {
        match self.secrets.provider {
            SecretProviderKind::Env => Box::new(EnvSecrets),
            SecretProviderKind::File => Box::new(FileSecrets::new(self.secrets.dir.clone())),
        }
    }
}

/// A credential value. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

/// Source of credentials. Resolved once at startup.
pub trait SecretProvider: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<Secret>>;
}

/// Reads secrets from environment variables.
pub struct EnvSecrets;

impl SecretProvider for EnvSecrets {
    fn get(&self, name: &str) -> Result<Option<Secret>> {
        Ok(std::env::var(name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(Secret))
    }
}

/// Reads secrets from `<dir>/<name>`, one file per secret.
pub struct FileSecrets {
    dir: PathBuf,
}

impl FileSecrets {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl SecretProvider for FileSecrets {
    fn get(&self, name: &str) -> Result<Option<Secret>> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read secret file: {}", path.display()))?;
        let value = raw.trim();
        if value.is_empty() {
            return Ok(None);
        }
        Ok(Some(Secret(value.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.retrieval.top_k, 5);
        assert_eq!(settings.llm.max_tokens, 2048);
        assert_eq!(settings.llm.model, "gpt-4-1106-preview");
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        let mut settings = Settings::default();
        settings.chunking.overlap = settings.chunking.chunk_size;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_top_k_bounds() {
        let mut settings = Settings::default();
        settings.retrieval.top_k = 0;
        assert!(settings.validate().is_err());

        settings.retrieval.top_k = settings.retrieval.max_top_k + 1;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_embedder_dimensions_follow_backend() {
        let mut embedder = EmbedderSettings::default();
        assert_eq!(embedder.dimensions().unwrap(), 384);

        embedder.backend = EmbedderBackend::Http;
        assert_eq!(embedder.dimensions().unwrap(), 1536);

        embedder.model = "text-embedding-3-large".to_string();
        assert_eq!(embedder.dimensions().unwrap(), 3072);

        embedder.model = "nomic-embed-text".to_string();
        assert!(embedder.dimensions().is_err());

        embedder.dimensions = Some(768);
        assert_eq!(embedder.dimensions().unwrap(), 768);
    }

    #[test]
    fn test_unknown_http_model_needs_dimensions() {
        let mut settings = Settings::default();
        settings.embedder.backend = EmbedderBackend::Http;
        settings.embedder.model = "nomic-embed-text".to_string();
        assert!(settings.validate().is_err());

        settings.embedder.dimensions = Some(768);
        settings.validate().unwrap();
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(
            &path,
            r#"
            [store]
            backend = "memory"

            [llm]
            model = "gpt-4o-mini"
            max_tokens = 512

            [retrieval]
            top_k = 3
            "#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.store.backend, StoreBackend::Memory);
        assert_eq!(settings.llm.model, "gpt-4o-mini");
        assert_eq!(settings.llm.max_tokens, 512);
        assert_eq!(settings.retrieval.top_k, 3);
        assert_eq!(settings.chunking.chunk_size, 1000);
    }

    #[test]
    fn test_file_secrets_trim_and_skip_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("OPENAI_API_KEY"), "  sk-test \n").unwrap();
        let provider = FileSecrets::new(dir.path().to_path_buf());

        let secret = provider.get("OPENAI_API_KEY").unwrap().unwrap();
        assert_eq!(secret.expose(), "sk-test");
        assert!(provider.get("MISSING").unwrap().is_none());
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new("sk-very-secret");
        assert!(!format!("{:?}", secret).contains("very-secret"));
    }
}
