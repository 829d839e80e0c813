use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, CreateCollectionBuilder, Distance, GetPointsBuilder, PointId, PointStruct,
    ScoredPoint, SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde_json::{Map as JsonMap, Value as JsonValue};

use super::document::{Chunk, Metadata, ScoredChunk, StoredChunk};
use crate::config::Secret;
use crate::error::RagError;

/// Persistence for embedded chunks.
///
/// `search` returns at most `top_k` hits by descending similarity. Equal
/// scores keep insertion order.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn write(&self, chunk: &Chunk) -> Result<(), RagError>;

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>, RagError>;
}

const SEQ_KEY: &str = "seq";

pub struct QdrantStore {
    client: Qdrant,
    collection_name: String,
    dimensions: usize,
    last_seq: AtomicI64,
}

impl QdrantStore {
    pub async fn new(
        url: &str,
        collection_name: &str,
        dimensions: usize,
        api_key: Option<Secret>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        tracing::info!("Building Qdrant client for URL: {}", url);
        let client = Qdrant::from_url(url)
            .api_key(api_key.map(|k| k.expose().to_string()))
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Qdrant client build failed: {}", e))?;

        let store = Self {
            client,
            collection_name: collection_name.to_string(),
            dimensions,
            last_seq: AtomicI64::new(0),
        };

        store.ensure_collection().await?;
        tracing::info!("Qdrant collection '{}' ready", collection_name);

        Ok(store)
    }

    async fn ensure_collection(&self) -> anyhow::Result<()> {
        if !self.client.collection_exists(&self.collection_name).await? {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection_name).vectors_config(
                        VectorParamsBuilder::new(self.dimensions as u64, Distance::Cosine),
                    ),
                )
                .await?;
        }
        Ok(())
    }

    /// Strictly increasing write sequence, used to break score ties.
    fn next_seq(&self) -> i64 {
        let now = Utc::now().timestamp_micros();
        let mut current = self.last_seq.load(Ordering::Relaxed);
        loop {
            let next = now.max(current + 1);
            match self
                .last_seq
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Sequence of an already stored point, so overwrites keep their tie position.
    async fn existing_seq(&self, id: &str) -> Result<Option<i64>, RagError> {
        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(&self.collection_name, vec![PointId::from(id.to_string())])
                    .with_payload(true),
            )
            .await
            .map_err(|e| RagError::StoreWrite(e.to_string()))?;

        Ok(response
            .result
            .into_iter()
            .next()
            .and_then(|point| point.payload.get(SEQ_KEY).and_then(|v| v.as_integer())))
    }

    async fn query(
        &self,
        query: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>, RagError> {
        let mut request = SearchPointsBuilder::new(&self.collection_name, query.to_vec(), limit as u64)
            .with_payload(true);
        if let Some(threshold) = score_threshold {
            request = request.score_threshold(threshold);
        }
        let response = self
            .client
            .search_points(request)
            .await
            .map_err(|e| RagError::StoreRead(e.to_string()))?;
        Ok(response.result)
    }
}

/// True when a full page of `limit` hits (sorted by descending score) may
/// hide further points scoring the same as the `top_k`-th hit.
fn tie_crosses_cutoff(scores: &[f32], top_k: usize, limit: usize) -> bool {
    if top_k == 0 || scores.len() < limit || scores.len() < top_k {
        return false;
    }
    match (scores.get(top_k - 1), scores.last()) {
        (Some(cutoff), Some(last)) => last >= cutoff,
        _ => false,
    }
}

/// Orders hits by descending score, then ascending write sequence, and keeps `top_k`.
fn rank_hits(mut hits: Vec<(i64, ScoredChunk)>, top_k: usize) -> Vec<ScoredChunk> {
    hits.sort_by(|(seq_a, a), (seq_b, b)| b.score.total_cmp(&a.score).then(seq_a.cmp(seq_b)));
    hits.truncate(top_k);
    hits.into_iter().map(|(_, hit)| hit).collect()
}

fn point_to_scored(point: ScoredPoint) -> Option<(i64, ScoredChunk)> {
    let id = match point.id?.point_id_options? {
        PointIdOptions::Uuid(uuid) => uuid,
        PointIdOptions::Num(num) => num.to_string(),
    };
    let text = point.payload.get("text")?.as_str()?.to_string();

    let mut metadata = Metadata::new();
    if let Some(fields) = point.payload.get("metadata").and_then(|v| v.as_struct()) {
        for (key, value) in &fields.fields {
            if let Some(s) = value.as_str() {
                metadata.insert(key.clone(), s.clone());
            }
        }
    }

    let seq = point
        .payload
        .get(SEQ_KEY)
        .and_then(|v| v.as_integer())
        .unwrap_or(i64::MAX);

    Some((
        seq,
        ScoredChunk {
            chunk: StoredChunk { id, text, metadata },
            score: point.score,
        },
    ))
}

#[async_trait]
impl DocumentStore for QdrantStore {
    async fn write(&self, chunk: &Chunk) -> Result<(), RagError> {
        if chunk.embedding.len() != self.dimensions {
            return Err(RagError::StoreWrite(format!(
                "chunk {} has {} dimensions, collection expects {}",
                chunk.id,
                chunk.embedding.len(),
                self.dimensions
            )));
        }

        let metadata: JsonMap<String, JsonValue> = chunk
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), JsonValue::String(v.clone())))
            .collect();

        let mut payload_map = JsonMap::new();
        payload_map.insert("text".to_string(), JsonValue::String(chunk.text.clone()));
        payload_map.insert("metadata".to_string(), JsonValue::Object(metadata));
        let seq = match self.existing_seq(&chunk.id).await? {
            Some(seq) => seq,
            None => self.next_seq(),
        };
        payload_map.insert(SEQ_KEY.to_string(), JsonValue::from(seq));
        let point = PointStruct::new(chunk.id.clone(), chunk.embedding.clone(), payload_map);

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection_name, vec![point]).wait(true))
            .await
            .map_err(|e| RagError::StoreWrite(e.to_string()))?;

        Ok(())
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>, RagError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        // One extra hit shows whether a score tie spans the cut-off. If it
        // does, widen the page to every point at or above the cut-off score.
        let mut limit = top_k + 1;
        let mut points = self.query(query, limit, None).await?;
        loop {
            let scores: Vec<f32> = points.iter().map(|p| p.score).collect();
            if !tie_crosses_cutoff(&scores, top_k, limit) {
                break;
            }
            let cutoff = scores[top_k - 1];
            limit = limit.saturating_mul(2);
            tracing::debug!(top_k, limit, cutoff, "score tie at cut-off, widening search");
            points = self.query(query, limit, Some(cutoff)).await?;
        }

        let hits = points.into_iter().filter_map(point_to_scored).collect();
        Ok(rank_hits(hits, top_k))
    }
}
