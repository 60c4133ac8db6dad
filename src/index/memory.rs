//! In-memory reference implementation of [`VectorIndex`].
//!
//! Cosine similarity over named vectors, exact filter evaluation, and
//! id-ordered scroll. Suitable for local mode, demos, and tests; a remote
//! vector store implements the same trait for production.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use super::{CollectionSchema, Filter, Point, ScoredPoint, VectorIndex};

#[derive(Default)]
struct Collection {
    /// Declared vector fields and their dimensions.
    vectors: HashMap<String, usize>,
    /// Points in stable id order so scroll pagination is deterministic.
    points: BTreeMap<String, Point>,
}

#[derive(Default)]
pub struct InMemoryIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na < 1e-12 || nb < 1e-12 {
        return 0.0;
    }
    dot / (na * nb)
}

fn matches(filter: Option<&Filter>, point: &Point) -> bool {
    filter.map_or(true, |f| f.matches(&point.payload))
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn ensure_collections(&self, schemas: &[CollectionSchema]) -> Result<()> {
        let mut collections = self.collections.write();
        for schema in schemas {
            collections
                .entry(schema.name.clone())
                .or_insert_with(|| Collection {
                    vectors: schema.vectors.iter().cloned().collect(),
                    points: BTreeMap::new(),
                });
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()> {
        let mut collections = self.collections.write();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| anyhow!("unknown collection: {collection}"))?;
        for point in points {
            for (name, vector) in &point.vectors {
                match coll.vectors.get(name) {
                    Some(dim) if *dim == vector.len() => {}
                    Some(dim) => {
                        return Err(anyhow!(
                            "vector '{name}' has {} dims, collection '{collection}' expects {dim}",
                            vector.len()
                        ))
                    }
                    None => {
                        return Err(anyhow!(
                            "collection '{collection}' has no vector field '{name}'"
                        ))
                    }
                }
            }
            coll.points.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector_name: &str,
        vector: &[f32],
        filter: Option<&Filter>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let collections = self.collections.read();
        let coll = collections
            .get(collection)
            .ok_or_else(|| anyhow!("unknown collection: {collection}"))?;

        let mut scored: Vec<ScoredPoint> = coll
            .points
            .values()
            .filter(|p| matches(filter, p))
            .filter_map(|p| {
                let v = p.vectors.get(vector_name)?;
                Some(ScoredPoint {
                    id: p.id.clone(),
                    score: cosine(vector, v),
                    payload: p.payload.clone(),
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<usize> {
        let collections = self.collections.read();
        let coll = collections
            .get(collection)
            .ok_or_else(|| anyhow!("unknown collection: {collection}"))?;
        Ok(coll.points.values().filter(|p| matches(filter, p)).count())
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        limit: usize,
        offset: Option<String>,
    ) -> Result<(Vec<Point>, Option<String>)> {
        let collections = self.collections.read();
        let coll = collections
            .get(collection)
            .ok_or_else(|| anyhow!("unknown collection: {collection}"))?;

        let lower = match &offset {
            Some(id) => Bound::Excluded(id.clone()),
            None => Bound::Unbounded,
        };

        let page: Vec<Point> = coll
            .points
            .range((lower, Bound::Unbounded))
            .map(|(_, p)| p)
            .filter(|p| matches(filter, p))
            .take(limit)
            .cloned()
            .collect();

        let next = if page.len() == limit {
            page.last().map(|p| p.id.clone())
        } else {
            None
        };
        Ok((page, next))
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        let mut collections = self.collections.write();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| anyhow!("unknown collection: {collection}"))?;
        for id in ids {
            coll.points.remove(id);
        }
        Ok(())
    }

    async fn delete_by_filter(&self, collection: &str, filter: &Filter) -> Result<()> {
        let mut collections = self.collections.write();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| anyhow!("unknown collection: {collection}"))?;
        coll.points.retain(|_, p| !filter.matches(&p.payload));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{engine_collections, DENSE_TEXT};
    use serde_json::json;

    fn point(id: &str, vector: Vec<f32>, city: &str) -> Point {
        Point {
            id: id.to_string(),
            vectors: HashMap::from([(DENSE_TEXT.to_string(), vector)]),
            payload: [
                ("city".to_string(), json!(city)),
                ("text".to_string(), json!(format!("doc {id}"))),
            ]
            .into_iter()
            .collect(),
        }
    }

    fn padded(head: &[f32]) -> Vec<f32> {
        let mut v = vec![0.0; crate::index::TEXT_DIM];
        v[..head.len()].copy_from_slice(head);
        v
    }

    #[tokio::test]
    async fn search_ranks_by_cosine_and_respects_filter() {
        let index = InMemoryIndex::new();
        index.ensure_collections(&engine_collections()).await.unwrap();
        index
            .upsert(
                "civic_kb",
                vec![
                    point("a", padded(&[1.0, 0.0]), "Pune"),
                    point("b", padded(&[0.6, 0.8]), "Pune"),
                    point("c", padded(&[1.0, 0.0]), "Mumbai"),
                ],
            )
            .await
            .unwrap();

        let filter = Filter::new().must_eq("city", "Pune");
        let hits = index
            .search("civic_kb", DENSE_TEXT, &padded(&[1.0, 0.0]), Some(&filter), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn scroll_pages_in_id_order() {
        let index = InMemoryIndex::new();
        index.ensure_collections(&engine_collections()).await.unwrap();
        let points: Vec<Point> = (0..5)
            .map(|i| point(&format!("p{i}"), padded(&[1.0]), "Pune"))
            .collect();
        index.upsert("civic_kb", points).await.unwrap();

        let (page1, next) = index.scroll("civic_kb", None, 2, None).await.unwrap();
        assert_eq!(page1.len(), 2);
        let (page2, _) = index.scroll("civic_kb", None, 2, next).await.unwrap();
        assert_eq!(page2[0].id, "p2");
    }

    #[tokio::test]
    async fn delete_by_filter_removes_matching_points() {
        let index = InMemoryIndex::new();
        index.ensure_collections(&engine_collections()).await.unwrap();
        index
            .upsert(
                "civic_kb",
                vec![
                    point("a", padded(&[1.0]), "Pune"),
                    point("b", padded(&[1.0]), "Mumbai"),
                ],
            )
            .await
            .unwrap();

        index
            .delete_by_filter("civic_kb", &Filter::new().must_eq("city", "Pune"))
            .await
            .unwrap();
        assert_eq!(index.count("civic_kb", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_dimension() {
        let index = InMemoryIndex::new();
        index.ensure_collections(&engine_collections()).await.unwrap();
        let bad = Point {
            id: "x".into(),
            vectors: HashMap::from([(DENSE_TEXT.to_string(), vec![1.0, 2.0])]),
            payload: Default::default(),
        };
        assert!(index.upsert("civic_kb", vec![bad]).await.is_err());
    }
}
