//! Vector index boundary: typed get/put/search over named collections.
//!
//! Each collection holds one or more named vector fields plus a flexible
//! payload mapping. The engine only depends on the [`VectorIndex`] trait;
//! [`InMemoryIndex`] is the reference implementation used for local mode
//! and tests.

mod memory;

pub use memory::InMemoryIndex;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::types::Payload;

pub const TEXT_DIM: usize = 384;
pub const IMAGE_DIM: usize = 512;

pub const DENSE_TEXT: &str = "dense_text";
pub const DENSE_IMAGE: &str = "dense_image";

/// Collection names used by the engine.
pub mod collections {
    pub const CIVIC_KB: &str = "civic_kb";
    pub const JURISDICTION_DIRECTORY: &str = "jurisdiction_directory";
    pub const COMPLAINT_TEMPLATES: &str = "complaint_templates";
    pub const CASE_LIBRARY: &str = "case_library";
    pub const USER_MEMORY: &str = "user_memory";
    pub const CHANNEL_STATUS: &str = "channel_status";
}

/// Named vector fields per collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub vectors: Vec<(String, usize)>,
}

/// The fixed collection layout of the assistant.
pub fn engine_collections() -> Vec<CollectionSchema> {
    let text_only = |name: &str| CollectionSchema {
        name: name.to_string(),
        vectors: vec![(DENSE_TEXT.to_string(), TEXT_DIM)],
    };
    vec![
        text_only(collections::CIVIC_KB),
        text_only(collections::JURISDICTION_DIRECTORY),
        text_only(collections::COMPLAINT_TEMPLATES),
        CollectionSchema {
            name: collections::CASE_LIBRARY.to_string(),
            vectors: vec![
                (DENSE_TEXT.to_string(), TEXT_DIM),
                (DENSE_IMAGE.to_string(), IMAGE_DIM),
            ],
        },
        text_only(collections::USER_MEMORY),
        text_only(collections::CHANNEL_STATUS),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Condition {
    /// Payload value equals the given value. A list-valued payload field
    /// matches if any element equals it.
    Eq(Value),
    /// Payload value equals any of the given values.
    Any(Vec<Value>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldCondition {
    pub key: String,
    pub condition: Condition,
}

/// Structural payload filter: conjunction of field conditions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    pub must: Vec<FieldCondition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must_eq(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.must.push(FieldCondition {
            key: key.to_string(),
            condition: Condition::Eq(value.into()),
        });
        self
    }

    pub fn must_any(mut self, key: &str, values: Vec<Value>) -> Self {
        self.must.push(FieldCondition {
            key: key.to_string(),
            condition: Condition::Any(values),
        });
        self
    }

    /// Evaluate the filter against a payload. Absent payload keys never match.
    pub fn matches(&self, payload: &Payload) -> bool {
        self.must.iter().all(|fc| {
            let Some(value) = payload.get(&fc.key) else {
                return false;
            };
            match &fc.condition {
                Condition::Eq(target) => value_matches(value, target),
                Condition::Any(targets) => targets.iter().any(|t| value_matches(value, t)),
            }
        })
    }

    /// Canonical serialization used to key per-filter caches.
    pub fn cache_key(&self) -> String {
        serde_json::to_string(&self.must).unwrap_or_default()
    }
}

fn value_matches(payload_value: &Value, target: &Value) -> bool {
    match payload_value {
        Value::Array(items) => items.iter().any(|i| i == target),
        other => other == target,
    }
}

/// A stored point: stable id, named vectors, payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub id: String,
    pub vectors: HashMap<String, Vec<f32>>,
    pub payload: Payload,
}

#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// Similarity search with structural filters and count-by-filter over
/// named-vector collections.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create any missing collections. Existing collections are untouched.
    async fn ensure_collections(&self, schemas: &[CollectionSchema]) -> Result<()>;

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()>;

    async fn search(
        &self,
        collection: &str,
        vector_name: &str,
        vector: &[f32],
        filter: Option<&Filter>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>>;

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<usize>;

    /// Page through points in stable id order. `offset` is the last id of
    /// the previous page; `None` starts from the beginning. Returns the page
    /// and the offset for the next one (`None` when exhausted).
    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        limit: usize,
        offset: Option<String>,
    ) -> Result<(Vec<Point>, Option<String>)>;

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()>;

    async fn delete_by_filter(&self, collection: &str, filter: &Filter) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(pairs: &[(&str, Value)]) -> Payload {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn eq_matches_scalar_and_list_membership() {
        let filter = Filter::new().must_eq("channel", "portal");
        assert!(filter.matches(&payload(&[("channel", json!("portal"))])));
        assert!(filter.matches(&payload(&[("channel", json!(["portal", "email"]))])));
        assert!(!filter.matches(&payload(&[("channel", json!("email"))])));
        assert!(!filter.matches(&payload(&[("city", json!("Pune"))])));
    }

    #[test]
    fn any_matches_any_of() {
        let filter = Filter::new().must_any("city", vec![json!("Pune"), json!("Mumbai")]);
        assert!(filter.matches(&payload(&[("city", json!("Mumbai"))])));
        assert!(!filter.matches(&payload(&[("city", json!("Delhi"))])));
    }

    #[test]
    fn cache_key_is_stable_and_distinguishes_filters() {
        let a = Filter::new().must_eq("city", "Pune");
        let b = Filter::new().must_eq("city", "Pune");
        let c = Filter::new().must_eq("city", "Mumbai");
        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());
    }
}
