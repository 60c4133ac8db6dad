//! Second-stage reranking.
//!
//! Contract: a reranker never drops or adds candidates, only resorts and
//! annotates `rerank_score`, and is order-stable for ties. The no-op variant
//! is the default; [`ScoringReranker`] drives whatever relevance-scoring
//! capability is wired in. Selection happens once at agent construction.

use async_trait::async_trait;
use std::sync::Arc;

use crate::capability::{Capabilities, RelevanceScorer};
use crate::config::EngineConfig;
use crate::types::DocumentHit;

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Infallible: on capability failure implementations return the input
    /// ordering unchanged.
    async fn rerank(&self, query: &str, hits: Vec<DocumentHit>) -> Vec<DocumentHit>;
}

/// Leaves order and scores untouched.
pub struct NoopReranker;

#[async_trait]
impl Reranker for NoopReranker {
    async fn rerank(&self, _query: &str, hits: Vec<DocumentHit>) -> Vec<DocumentHit> {
        hits
    }
}

/// Reranks with a relevance-scoring capability (cross-encoder class model).
pub struct ScoringReranker {
    scorer: Arc<dyn RelevanceScorer>,
}

impl ScoringReranker {
    pub fn new(scorer: Arc<dyn RelevanceScorer>) -> Self {
        Self { scorer }
    }
}

#[async_trait]
impl Reranker for ScoringReranker {
    async fn rerank(&self, query: &str, hits: Vec<DocumentHit>) -> Vec<DocumentHit> {
        if hits.is_empty() {
            return hits;
        }

        let mut scores = Vec::with_capacity(hits.len());
        for hit in &hits {
            match self.scorer.score(query, &hit.text).await {
                Ok(score) => scores.push(score),
                Err(err) => {
                    // One failed pair degrades the whole batch to upstream
                    // order; partial annotation would reorder arbitrarily.
                    tracing::warn!(error = %err, "relevance scoring failed, keeping upstream order");
                    return hits;
                }
            }
        }

        let mut scored = hits;
        for (hit, score) in scored.iter_mut().zip(scores) {
            hit.rerank_score = Some(score);
        }
        scored.sort_by(|a, b| {
            b.rerank_score
                .partial_cmp(&a.rerank_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored
    }
}

/// Pick the reranker once, at startup, from config and wired capabilities.
pub fn build_reranker(capabilities: &Capabilities, config: &EngineConfig) -> Arc<dyn Reranker> {
    if config.features.enable_rerank {
        if let Some(scorer) = &capabilities.relevance_scorer {
            return Arc::new(ScoringReranker::new(scorer.clone()));
        }
    }
    Arc::new(NoopReranker)
}
