use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt};
use uuid::Uuid;

use super::document::{Chunk, Document, IngestReport};
use super::embeddings::{check_dimensions, Embedder};
use super::vector_store::DocumentStore;
use crate::error::{IngestError, RagError};
use crate::indexer::chunker::{chunk_text, ChunkingConfig, TextChunk};

const BATCH_SIZE: usize = 32;
const EMBED_CONCURRENCY: usize = 4;

/// Chunk, embed and persist documents.
pub struct IngestionPipeline {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn DocumentStore>,
    embed_timeout: Duration,
    store_timeout: Duration,
}

pub fn chunk_id(document_id: &str, chunk_index: usize) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("{}:{}", document_id, chunk_index).as_bytes(),
    )
    .to_string()
}

impl IngestionPipeline {
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

    /// Returns the ids of all written chunks, in document order.
    ///
    /// On failure the [`IngestError`] lists the chunks already committed.
    pub async fn ingest(
        &self,
        document: &Document,
        chunking: &ChunkingConfig,
    ) -> Result<IngestReport, IngestError> {
        let document_id = document.id();
        let fail = |committed: Vec<String>, source: RagError| IngestError {
            document_id: document_id.clone(),
            committed,
            source,
        };

        if document.text.trim().is_empty() {
            return Err(fail(Vec::new(), RagError::Validation("document text is empty".to_string())));
        }
        chunking.validate().map_err(|e| fail(Vec::new(), e))?;

        let chunks = chunk_text(&document.text, chunking);
        tracing::debug!(document_id = %document_id, chunk_count = chunks.len(), "chunked document");

        let dimensions = self.embedder.dimensions();
        let mut embedded = futures::stream::iter(chunks.chunks(BATCH_SIZE))
            .map(|batch| self.embed_batch(batch, dimensions))
            .buffered(EMBED_CONCURRENCY);

        let mut committed = Vec::with_capacity(chunks.len());
        let mut offset = 0;
        loop {
            let embeddings = match embedded.try_next().await {
                Ok(Some(embeddings)) => embeddings,
                Ok(None) => break,
                Err(e) => return Err(fail(committed, e)),
            };

            for (text_chunk, embedding) in chunks[offset..].iter().zip(embeddings) {
                let chunk = self.build_chunk(document, &document_id, text_chunk, embedding);
                if let Err(e) = self.write(&chunk).await {
                    tracing::error!(
                        document_id = %document_id,
                        chunk_index = text_chunk.chunk_index,
                        committed = committed.len(),
                        error = %e,
                        "chunk write failed"
                    );
                    return Err(fail(committed, e));
                }
                committed.push(chunk.id);
                offset += 1;
            }
        }

        tracing::info!(document_id = %document_id, chunk_count = committed.len(), "ingested document");
        Ok(IngestReport {
            document_id,
            chunk_ids: committed,
        })
    }

    async fn embed_batch(&self, batch: &[TextChunk], dimensions: usize) -> Result<Vec<Vec<f32>>, RagError> {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embeddings = tokio::time::timeout(self.embed_timeout, self.embedder.embed_batch(&texts))
            .await
            .map_err(|_| RagError::timeout("embedding", self.embed_timeout))??;

        if embeddings.len() != batch.len() {
            return Err(RagError::Embedding(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                embeddings.len()
            )));
        }
        for embedding in &embeddings {
            check_dimensions(embedding, dimensions)?;
        }
        Ok(embeddings)
    }

    async fn write(&self, chunk: &Chunk) -> Result<(), RagError> {
        tokio::time::timeout(self.store_timeout, self.store.write(chunk))
            .await
            .map_err(|_| RagError::timeout("document store write", self.store_timeout))?
    }

    fn build_chunk(
        &self,
        document: &Document,
        document_id: &str,
        text_chunk: &TextChunk,
        embedding: Vec<f32>,
    ) -> Chunk {
        let mut metadata = document.metadata.clone();
        metadata.insert("chunk_index".to_string(), text_chunk.chunk_index.to_string());
        metadata.insert("document_id".to_string(), document_id.to_string());

        Chunk {
            id: chunk_id(document_id, text_chunk.chunk_index),
            text: text_chunk.text.clone(),
            embedding,
            metadata,
        }
    }
}
