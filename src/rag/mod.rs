pub mod augment;
pub mod document;
pub mod embeddings;
pub mod ingest;
pub mod memory_store;
pub mod retriever;
pub mod vector_store;

use std::sync::Arc;

use anyhow::Result;

use crate::config::{EmbedderBackend, SecretProvider, Settings, StoreBackend};
use self::embeddings::{Embedder, FastEmbedder, HttpEmbedder};
use self::memory_store::InMemoryStore;
use self::vector_store::{DocumentStore, QdrantStore};

pub use self::augment::augment;
pub use self::document::{
    AugmentedPrompt, Chunk, Document, GenerationResult, IngestReport, Metadata, RetrievalResult,
    ScoredChunk, StoredChunk,
};
pub use self::ingest::IngestionPipeline;
pub use self::retriever::Retriever;

/// Builds the configured embedder.
pub fn build_embedder(settings: &Settings, secrets: &dyn SecretProvider) -> Result<Arc<dyn Embedder>> {
    let cfg = &settings.embedder;
    let dimensions = cfg.dimensions()?;
    let embedder: Arc<dyn Embedder> = match cfg.backend {
        EmbedderBackend::Fastembed => Arc::new(FastEmbedder::new(&cfg.model_dir, dimensions)?),
        EmbedderBackend::Http => {
            let api_key = match cfg.api_key_secret {
                Some(ref name) => secrets.get(name)?,
                None => None,
            };
            Arc::new(HttpEmbedder::new(
                cfg.endpoint.clone(),
                cfg.model.clone(),
                api_key,
                dimensions,
                settings.timeouts.embed(),
            )?)
        }
    };
    Ok(embedder)
}

/// Connects to the configured document store.
pub async fn build_store(settings: &Settings, secrets: &dyn SecretProvider) -> Result<Arc<dyn DocumentStore>> {
    let cfg = &settings.store;
    let dimensions = settings.embedder.dimensions()?;
    let store: Arc<dyn DocumentStore> = match cfg.backend {
        StoreBackend::Qdrant => {
            let api_key = match cfg.api_key_secret {
                Some(ref name) => secrets.get(name)?,
                None => None,
            };
            tracing::info!("Connecting to Qdrant: {}", cfg.url);
            Arc::new(
                QdrantStore::new(
                    &cfg.url,
                    &cfg.collection,
                    dimensions,
                    api_key,
                    settings.timeouts.store(),
                )
                .await?,
            )
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory document store; contents are lost on exit");
            Arc::new(InMemoryStore::new(dimensions))
        }
    };
    Ok(store)
}
