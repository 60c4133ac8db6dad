//! Deterministic offline embedders.
//!
//! Weaker than transformer embeddings but fully deterministic and dependency
//! free: the text variant preserves meaningful similarity through shared
//! tokens, the image variant through a coarse byte-distribution signature.

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

use super::{ImageEmbedder, TextEmbedder};
use crate::index::{IMAGE_DIM, TEXT_DIM};

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9]{2,}").expect("word regex is valid"));

/// Stable 64-bit FNV-1a hash; must not vary across processes, unlike the
/// std hasher's randomized state.
fn hash_token(token: &str) -> u64 {
    token
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
            (h ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
        })
}

fn finalize(mut v: Vec<f32>) -> Vec<f32> {
    // Sublinear term-frequency scaling, then L2 normalization.
    for x in v.iter_mut() {
        *x = x.signum() * x.abs().sqrt();
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

/// Signed bag-of-words hashing embedder for text.
#[derive(Debug, Clone)]
pub struct HashingTextEmbedder {
    dim: usize,
}

impl Default for HashingTextEmbedder {
    fn default() -> Self {
        Self { dim: TEXT_DIM }
    }
}

impl HashingTextEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        let lower = text.to_lowercase();
        for token in WORD_RE.find_iter(&lower) {
            let h = hash_token(token.as_str());
            let idx = (h % self.dim as u64) as usize;
            let sign = if (h >> 8) & 1 == 1 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        finalize(v)
    }
}

#[async_trait]
impl TextEmbedder for HashingTextEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

/// Hashed byte-bigram signature for images. Not a visual model, but stable
/// and similarity-preserving for identical or near-identical uploads.
#[derive(Debug, Clone)]
pub struct HistogramImageEmbedder {
    dim: usize,
}

impl Default for HistogramImageEmbedder {
    fn default() -> Self {
        Self { dim: IMAGE_DIM }
    }
}

impl HistogramImageEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl ImageEmbedder for HistogramImageEmbedder {
    async fn embed(&self, image: &[u8]) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dim];
        for pair in image.windows(2) {
            let idx = (usize::from(pair[0]) << 8 | usize::from(pair[1])) % self.dim;
            v[idx] += 1.0;
        }
        Ok(finalize(v))
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn text_embedding_is_deterministic_and_normalized() {
        let embedder = HashingTextEmbedder::default();
        let a = embedder.embed("pothole on the main road").await.unwrap();
        let b = embedder.embed("pothole on the main road").await.unwrap();
        assert_eq!(a, b);
        let norm = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn shared_tokens_raise_similarity() {
        let embedder = HashingTextEmbedder::default();
        let query = embedder.embed("pothole on road").await.unwrap();
        let related = embedder.embed("deep pothole near the road junction").await.unwrap();
        let unrelated = embedder.embed("streetlight flickering at night").await.unwrap();
        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    }

    #[tokio::test]
    async fn empty_text_embeds_to_zero_vector() {
        let embedder = HashingTextEmbedder::default();
        let v = embedder.embed("").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn image_embedding_separates_different_payloads() {
        let embedder = HistogramImageEmbedder::default();
        let a = embedder.embed(&[1, 2, 3, 4, 5, 6, 7, 8]).await.unwrap();
        let b = embedder.embed(&[1, 2, 3, 4, 5, 6, 7, 8]).await.unwrap();
        let c = embedder.embed(&[250, 240, 230, 220, 210, 200]).await.unwrap();
        assert_eq!(a, b);
        assert!(cosine(&a, &c) < 0.99);
    }
}
