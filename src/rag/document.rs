use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type Metadata = BTreeMap<String, String>;

/// Source document handed to the ingestion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub text: String,
    pub metadata: Metadata,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Content address over the `source` metadata and the text.
    ///
    /// Stored documents are immutable: an edited version of a source gets a
    /// new id, while re-ingesting identical content maps onto the same chunks.
    pub fn id(&self) -> String {
        let mut hasher = Sha256::new();
        if let Some(source) = self.metadata.get("source") {
            hasher.update(source.as_bytes());
        }
        hasher.update([0u8]);
        hasher.update(self.text.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..8])
    }
}

/// A chunk ready to be written, embedding attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
}

/// A chunk as returned by a store search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredChunk {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: StoredChunk,
    pub score: f32,
}

/// Search hits ordered by descending score, ties in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub matches: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.matches.iter().map(|m| m.chunk.id.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AugmentedPrompt {
    pub text: String,
    pub context_chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub text: String,
    pub model: String,
}

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub document_id: String,
    pub chunk_ids: Vec<String>,
}
