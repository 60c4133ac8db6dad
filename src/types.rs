use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Flexible payload mapping attached to every indexed point.
/// The payload is the single source of truth for domain facts about a point
/// (category, department, sla_days, channel_type, required_fields, ...).
pub type Payload = serde_json::Map<String, Value>;

/// A single retrieval result.
///
/// `id` uniquely identifies a point inside one collection. `score` carries
/// whatever the producing stage assigned (cosine similarity, BM25, fused RRF);
/// `rerank_score` is only set after a second-stage reranker ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentHit {
    pub id: String,
    pub text: String,
    pub payload: Payload,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

impl DocumentHit {
    /// Relevance as seen by downstream consumers: the rerank score when a
    /// reranker ran, the retrieval score otherwise.
    pub fn relevance(&self) -> f32 {
        self.rerank_score.unwrap_or(self.score)
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// String list payload field. Accepts a single string as a one-element
    /// list, which keeps hand-edited seed data forgiving.
    pub fn payload_str_list(&self, key: &str) -> Vec<String> {
        match self.payload.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// Integer payload field, tolerating string-encoded numbers.
    pub fn payload_i64(&self, key: &str) -> Option<i64> {
        match self.payload.get(key) {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

/// Three-level confidence label derived from the top evidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// No evidence at all reads as low confidence.
    pub fn from_score(score: Option<f32>) -> Self {
        match score {
            Some(s) if s >= 0.35 => Confidence::High,
            Some(s) if s >= 0.25 => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

/// One evidence entry in a decision: the top hit of a retrieval source with
/// a bounded-length excerpt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub collection: String,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    pub snippet: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hit_with(payload: Payload) -> DocumentHit {
        DocumentHit {
            id: "p1".into(),
            text: String::new(),
            payload,
            score: 0.0,
            rerank_score: None,
        }
    }

    #[test]
    fn payload_i64_accepts_string_encoded_numbers() {
        let mut payload = Payload::new();
        payload.insert("sla_days".into(), json!("7"));
        assert_eq!(hit_with(payload).payload_i64("sla_days"), Some(7));

        let mut payload = Payload::new();
        payload.insert("sla_days".into(), json!(5));
        assert_eq!(hit_with(payload).payload_i64("sla_days"), Some(5));
    }

    #[test]
    fn payload_str_list_promotes_single_string() {
        let mut payload = Payload::new();
        payload.insert("channel_type".into(), json!("portal"));
        assert_eq!(hit_with(payload).payload_str_list("channel_type"), vec!["portal"]);
    }

    #[test]
    fn relevance_prefers_rerank_score() {
        let mut hit = hit_with(Payload::new());
        hit.score = 0.1;
        assert_eq!(hit.relevance(), 0.1);
        hit.rerank_score = Some(0.9);
        assert_eq!(hit.relevance(), 0.9);
    }

    #[test]
    fn confidence_buckets() {
        assert_eq!(Confidence::from_score(None), Confidence::Low);
        assert_eq!(Confidence::from_score(Some(0.1)), Confidence::Low);
        assert_eq!(Confidence::from_score(Some(0.25)), Confidence::Medium);
        assert_eq!(Confidence::from_score(Some(0.35)), Confidence::High);
    }
}
