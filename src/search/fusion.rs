//! Reciprocal Rank Fusion: merges ranked lists without score normalization.
//!
//! Lexical and semantic retrieval scores live on incomparable scales, so raw
//! averaging is meaningless; RRF only consumes ranks. An item ranked highly
//! by multiple independent strategies outscores an item ranked #1 by one.
//! Formula: rrf_score(doc) = Σ 1/(k + rank_i) for each list containing doc.

use std::collections::HashMap;

use crate::types::DocumentHit;

/// Fuse one or more ranked lists into a single ranked list.
///
/// Documents are deduplicated by id; the first-seen record is kept as the
/// representative, with its `score` overwritten by the fused score. The sort
/// is stable, so ties keep first-list then earlier-list relative order.
pub fn reciprocal_rank_fusion(
    lists: &[Vec<DocumentHit>],
    k: usize,
    top_k: usize,
) -> Vec<DocumentHit> {
    let mut scores: HashMap<&str, f32> = HashMap::new();
    // First-seen order doubles as the tie-break order.
    let mut merged: Vec<DocumentHit> = Vec::new();

    for list in lists {
        for (rank, hit) in list.iter().enumerate() {
            let rrf = 1.0 / (k as f32 + rank as f32 + 1.0);
            if let Some(score) = scores.get_mut(hit.id.as_str()) {
                *score += rrf;
            } else {
                scores.insert(hit.id.as_str(), rrf);
                let mut representative = hit.clone();
                representative.rerank_score = None;
                merged.push(representative);
            }
        }
    }

    for hit in &mut merged {
        hit.score = scores.get(hit.id.as_str()).copied().unwrap_or(0.0);
    }
    merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    merged.truncate(top_k);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Payload;
    use serde_json::json;

    fn hit(id: &str, score: f32) -> DocumentHit {
        DocumentHit {
            id: id.to_string(),
            text: format!("text {id}"),
            payload: Payload::new(),
            score,
            rerank_score: None,
        }
    }

    #[test]
    fn agreement_outranks_single_list_prominence() {
        // "both" is #1 in two lists, "solo" is #1 in one.
        let list_a = vec![hit("both", 0.9), hit("a2", 0.5)];
        let list_b = vec![hit("both", 12.0), hit("b2", 3.0)];
        let list_c = vec![hit("solo", 0.99)];

        let fused = reciprocal_rank_fusion(&[list_a, list_b, list_c], 60, 10);
        assert_eq!(fused[0].id, "both");
        let expected = 2.0 / 61.0;
        assert!((fused[0].score - expected).abs() < 1e-6);

        let solo = fused.iter().find(|h| h.id == "solo").unwrap();
        assert!((solo.score - 1.0 / 61.0).abs() < 1e-6);
        assert!(fused[0].score > solo.score);
    }

    #[test]
    fn deduplicates_and_keeps_first_seen_payload() {
        let mut first = hit("x", 0.9);
        first.payload.insert("category".into(), json!("Pothole"));
        let mut second = hit("x", 4.2);
        second.payload.insert("category".into(), json!("Garbage"));

        let fused = reciprocal_rank_fusion(&[vec![first], vec![second]], 60, 10);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].payload.get("category"), Some(&json!("Pothole")));
        // Input scores never leak through; only the fused score remains.
        assert!((fused[0].score - 2.0 / 61.0).abs() < 1e-6);
    }

    #[test]
    fn deterministic_and_stable_for_ties() {
        let list_a = vec![hit("a", 1.0), hit("b", 0.5)];
        let list_b = vec![hit("c", 1.0), hit("d", 0.5)];

        let first = reciprocal_rank_fusion(&[list_a.clone(), list_b.clone()], 60, 10);
        let second = reciprocal_rank_fusion(&[list_a, list_b], 60, 10);

        let ids: Vec<&str> = first.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b", "d"]); // ties keep earlier-list order
        assert_eq!(
            ids,
            second.iter().map(|h| h.id.as_str()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn truncates_to_top_k() {
        let list: Vec<DocumentHit> = (0..10).map(|i| hit(&format!("d{i}"), 1.0)).collect();
        let fused = reciprocal_rank_fusion(&[list], 60, 3);
        assert_eq!(fused.len(), 3);
    }
}
