//! Image-derived issue hints via the zero-shot image-classification
//! capability.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capability::ImageClassifier;

/// Civic issue labels with the prompts describing them.
pub const DEFAULT_LABELS: &[(&str, &str)] = &[
    ("Pothole", "a photo of a pothole on a road"),
    ("Garbage", "a photo of garbage pile on street"),
    ("Streetlight", "a photo of a streetlight at night"),
    ("Water Leak", "a photo of water leak on road"),
    ("Electricity", "a photo of electrical wire or pole"),
    ("Sanitation", "a photo of sewage overflow"),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageHint {
    pub label: String,
    pub score: f32,
}

/// Top issue-category hints for an image. Best-effort: no classifier wired
/// or a failed call both yield an empty list.
pub async fn infer_image_hints(
    classifier: Option<&Arc<dyn ImageClassifier>>,
    image: &[u8],
    top_k: usize,
) -> Vec<ImageHint> {
    let Some(classifier) = classifier else {
        return Vec::new();
    };
    let labels: Vec<(String, String)> = DEFAULT_LABELS
        .iter()
        .map(|(l, p)| (l.to_string(), p.to_string()))
        .collect();

    match classifier.classify(image, &labels).await {
        Ok(mut scored) => {
            scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            scored
                .into_iter()
                .take(top_k)
                .map(|s| ImageHint {
                    label: s.label,
                    score: s.score,
                })
                .collect()
        }
        Err(err) => {
            tracing::warn!(error = %err, "image hint classification failed");
            Vec::new()
        }
    }
}
