//! In-process [`DocumentStore`] using cosine similarity.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::document::{Chunk, ScoredChunk, StoredChunk};
use super::vector_store::DocumentStore;
use crate::error::RagError;

/// Chunks kept in insertion order behind a `RwLock`.
///
/// Re-writing an existing id replaces it in place, keeping its original
/// position for tie-breaking.
#[derive(Debug)]
pub struct InMemoryStore {
    dimensions: usize,
    chunks: RwLock<Vec<Chunk>>,
}

impl InMemoryStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            chunks: RwLock::new(Vec::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chunks.read().await.is_empty()
    }
}

/// Returns 0.0 if either vector has zero magnitude or the result is not finite.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let similarity = dot / (norm_a * norm_b);
    if similarity.is_finite() {
        similarity
    } else {
        0.0
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn write(&self, chunk: &Chunk) -> Result<(), RagError> {
        if chunk.embedding.len() != self.dimensions {
            return Err(RagError::StoreWrite(format!(
                "chunk {} has {} dimensions, store expects {}",
                chunk.id,
                chunk.embedding.len(),
                self.dimensions
            )));
        }

        let mut chunks = self.chunks.write().await;
        match chunks.iter_mut().find(|c| c.id == chunk.id) {
            Some(existing) => *existing = chunk.clone(),
            None => chunks.push(chunk.clone()),
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>, RagError> {
        if query.len() != self.dimensions {
            return Err(RagError::StoreRead(format!(
                "query has {} dimensions, store expects {}",
                query.len(),
                self.dimensions
            )));
        }

        let chunks = self.chunks.read().await;
        let mut scored: Vec<ScoredChunk> = chunks
            .iter()
            .map(|chunk| ScoredChunk {
                chunk: StoredChunk {
                    id: chunk.id.clone(),
                    text: chunk.text.clone(),
                    metadata: chunk.metadata.clone(),
                },
                score: cosine_similarity(&chunk.embedding, query),
            })
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }
}
