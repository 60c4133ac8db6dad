//! External-capability boundary.
//!
//! The engine consumes models (embeddings, relevance scoring, OCR, ASR,
//! image labeling, prose rendering) as capabilities behind trait objects.
//! Which implementation is active is decided once, when the [`Capabilities`]
//! bundle is constructed, never inline at call sites. Every capability call
//! is fallible; the caller owns the degrade policy.

mod offline;

pub use offline::{HashingTextEmbedder, HistogramImageEmbedder};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::Evidence;

/// Fixed-length text embedding.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;
}

/// Fixed-length image embedding over raw encoded image bytes.
#[async_trait]
pub trait ImageEmbedder: Send + Sync {
    async fn embed(&self, image: &[u8]) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;
}

/// Audio-to-text transcription.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<String>;
}

/// Optical text extraction from an image (screenshots of portal errors etc).
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, image: &[u8]) -> Result<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f32,
}

/// Zero-shot image classification against a caller-supplied label set.
/// Each label comes with a natural-language prompt describing it.
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    async fn classify(&self, image: &[u8], labels: &[(String, String)]) -> Result<Vec<LabelScore>>;
}

/// Second-stage relevance scoring for (query, candidate) pairs.
/// Higher score = more relevant.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    async fn score(&self, query: &str, candidate: &str) -> Result<f32>;
}

/// Natural-language rendering of a structured decision.
#[async_trait]
pub trait AnswerRenderer: Send + Sync {
    async fn render(&self, facts: &serde_json::Value, evidence: &[Evidence]) -> Result<String>;
}

/// Dependency-injected capability bundle owned by the process.
///
/// Embedders are mandatory (retrieval cannot run without vectors); everything
/// else is optional and its absence is itself the degrade policy.
#[derive(Clone)]
pub struct Capabilities {
    pub text_embedder: Arc<dyn TextEmbedder>,
    pub image_embedder: Arc<dyn ImageEmbedder>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
    pub text_extractor: Option<Arc<dyn TextExtractor>>,
    pub image_classifier: Option<Arc<dyn ImageClassifier>>,
    pub relevance_scorer: Option<Arc<dyn RelevanceScorer>>,
    pub renderer: Option<Arc<dyn AnswerRenderer>>,
}

impl Capabilities {
    /// Fully offline bundle: deterministic embedders, no optional models.
    /// The engine stays end-to-end runnable with no model weights present.
    pub fn offline() -> Self {
        Self {
            text_embedder: Arc::new(HashingTextEmbedder::default()),
            image_embedder: Arc::new(HistogramImageEmbedder::default()),
            transcriber: None,
            text_extractor: None,
            image_classifier: None,
            relevance_scorer: None,
            renderer: None,
        }
    }
}
