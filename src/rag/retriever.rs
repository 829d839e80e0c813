use std::sync::Arc;
use std::time::Duration;

use super::document::RetrievalResult;
use super::embeddings::{check_dimensions, Embedder};
use super::vector_store::DocumentStore;
use crate::error::RagError;

/// Embeds a query and returns the nearest stored chunks.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn DocumentStore>,
    embed_timeout: Duration,
    store_timeout: Duration,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn DocumentStore>,
        embed_timeout: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            store,
            embed_timeout,
            store_timeout,
        }
    }

    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<RetrievalResult, RagError> {
        if top_k == 0 {
            return Err(RagError::Validation("top_k must be at least 1".to_string()));
        }

        let query_embedding = tokio::time::timeout(self.embed_timeout, self.embedder.embed(query))
            .await
            .map_err(|_| RagError::timeout("query embedding", self.embed_timeout))??;
        check_dimensions(&query_embedding, self.embedder.dimensions())?;

        let mut matches = tokio::time::timeout(self.store_timeout, self.store.search(&query_embedding, top_k))
            .await
            .map_err(|_| RagError::timeout("document store search", self.store_timeout))??;
        matches.truncate(top_k);

        tracing::debug!(top_k, result_count = matches.len(), "retrieved context");
        Ok(RetrievalResult { matches })
    }
}
