//! Hybrid retrieval: dense (semantic) + sparse (lexical) with RRF fusion.

use anyhow::{Context, Result};
use std::sync::Arc;

use super::fusion::reciprocal_rank_fusion;
use super::sparse::SparseIndexCache;
use crate::capability::TextEmbedder;
use crate::config::EngineConfig;
use crate::index::{Filter, VectorIndex, DENSE_TEXT};
use crate::types::DocumentHit;

pub struct HybridRetriever {
    store: Arc<dyn VectorIndex>,
    embedder: Arc<dyn TextEmbedder>,
    sparse: SparseIndexCache,
    hybrid_enabled: bool,
    rrf_k: usize,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<dyn VectorIndex>,
        embedder: Arc<dyn TextEmbedder>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            sparse: SparseIndexCache::new(store.clone(), config.sparse.clone()),
            store,
            embedder,
            hybrid_enabled: config.features.enable_hybrid,
            rrf_k: config.search.rrf_k,
        }
    }

    /// Similarity search against an arbitrary named vector field.
    pub async fn vector_search(
        &self,
        collection: &str,
        vector_name: &str,
        vector: &[f32],
        filter: Option<&Filter>,
        limit: usize,
    ) -> Result<Vec<DocumentHit>> {
        let points = self
            .store
            .search(collection, vector_name, vector, filter, limit)
            .await
            .with_context(|| format!("vector search on '{collection}' failed"))?;
        Ok(points
            .into_iter()
            .map(|p| {
                let text = p
                    .payload
                    .get("text")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                DocumentHit {
                    id: p.id,
                    text,
                    payload: p.payload,
                    score: p.score,
                    rerank_score: None,
                }
            })
            .collect())
    }

    /// Pure semantic search over the text vector field.
    pub async fn dense_search(
        &self,
        collection: &str,
        query: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> Result<Vec<DocumentHit>> {
        let vector = self
            .embedder
            .embed(query)
            .await
            .context("query embedding failed")?;
        self.vector_search(collection, DENSE_TEXT, &vector, filter, limit)
            .await
    }

    /// Dense and sparse retrieval fused with RRF. When the sparse index is
    /// unavailable for the key, the dense list is returned unmodified.
    pub async fn hybrid_search(
        &self,
        collection: &str,
        query: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> Result<Vec<DocumentHit>> {
        let dense = self.dense_search(collection, query, filter, limit).await?;
        if !self.hybrid_enabled {
            return Ok(dense);
        }

        match self.sparse.entry(collection, filter).await {
            None => Ok(dense),
            Some(entry) => {
                let sparse_hits = match entry.search(query, limit) {
                    Ok(hits) => hits,
                    Err(err) => {
                        tracing::warn!(collection, error = %err, "sparse leg failed, dense only");
                        return Ok(dense);
                    }
                };
                Ok(reciprocal_rank_fusion(
                    &[dense, sparse_hits],
                    self.rrf_k,
                    limit,
                ))
            }
        }
    }

    pub fn sparse_cache(&self) -> &SparseIndexCache {
        &self.sparse
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::HashingTextEmbedder;
    use crate::index::{engine_collections, InMemoryIndex, Point};
    use serde_json::json;
    use std::collections::HashMap;

    async fn retriever_with_kb() -> HybridRetriever {
        let store = Arc::new(InMemoryIndex::new());
        store.ensure_collections(&engine_collections()).await.unwrap();
        let embedder = Arc::new(HashingTextEmbedder::default());

        let docs = [
            ("kb-pothole", "pothole on the road near the market"),
            ("kb-garbage", "garbage pile not collected for days"),
            ("kb-light", "streetlight not working at night"),
        ];
        let mut points = Vec::new();
        for (id, text) in docs {
            let vector = embedder.embed(text).await.unwrap();
            points.push(Point {
                id: id.to_string(),
                vectors: HashMap::from([(DENSE_TEXT.to_string(), vector)]),
                payload: [
                    ("text".to_string(), json!(text)),
                    ("city".to_string(), json!("Pune")),
                ]
                .into_iter()
                .collect(),
            });
        }
        store.upsert("civic_kb", points).await.unwrap();

        HybridRetriever::new(store, embedder, &EngineConfig::default())
    }

    #[tokio::test]
    async fn dense_search_finds_lexically_overlapping_doc() {
        let retriever = retriever_with_kb().await;
        let hits = retriever
            .dense_search("civic_kb", "pothole on road", None, 3)
            .await
            .unwrap();
        assert_eq!(hits[0].id, "kb-pothole");
    }

    #[tokio::test]
    async fn hybrid_agreement_keeps_best_doc_on_top() {
        let retriever = retriever_with_kb().await;
        let hits = retriever
            .hybrid_search("civic_kb", "pothole on road", None, 3)
            .await
            .unwrap();
        assert_eq!(hits[0].id, "kb-pothole");
        // Fused score: top of both legs.
        assert!((hits[0].score - 2.0 / 61.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn hybrid_degrades_to_dense_when_disabled() {
        let store = Arc::new(InMemoryIndex::new());
        store.ensure_collections(&engine_collections()).await.unwrap();
        let mut config = EngineConfig::default();
        config.features.enable_hybrid = false;
        let retriever =
            HybridRetriever::new(store, Arc::new(HashingTextEmbedder::default()), &config);

        let hits = retriever
            .hybrid_search("civic_kb", "anything", None, 3)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
