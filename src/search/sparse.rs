//! Self-maintaining sparse (lexical) index cache.
//!
//! Keeps one in-RAM Tantivy index per (collection, filter) key, built from a
//! bounded snapshot of the vector store's documents for that filter. Every
//! lookup checks the live document count and rebuilds when it drifts by more
//! than max(drift_min_docs, round(drift_fraction * live)). Rebuilds are
//! serialized per key and swap the snapshot atomically; readers keep using
//! the previous snapshot while a rebuild is in flight.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{self, IndexRecordOption, Schema, Value as TantivyValue, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, TantivyDocument, Term};

use crate::config::SparseCacheConfig;
use crate::index::{Filter, VectorIndex};
use crate::types::{DocumentHit, Payload};

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9_]+").expect("token regex is valid"));

/// Lowercase alphanumeric/underscore runs.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    TOKEN_RE
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}

type CacheKey = (String, String);

/// One immutable snapshot: never mutated in place, only replaced wholesale.
pub struct SparseEntry {
    reader: IndexReader,
    id_field: schema::Field,
    text_field: schema::Field,
    docs_by_id: HashMap<String, DocumentHit>,
    pub doc_count: usize,
    pub built_at: DateTime<Utc>,
}

impl SparseEntry {
    fn build(docs: Vec<DocumentHit>) -> Result<Self> {
        let mut sb = Schema::builder();
        let id_field = sb.add_text_field("id", STRING | STORED);
        let text_field = sb.add_text_field("text", TEXT);
        let schema = sb.build();

        let index = Index::create_in_ram(schema);
        let mut writer = index
            .writer(50_000_000)
            .context("Failed to create sparse index writer")?;
        for hit in &docs {
            writer.add_document(doc!(
                id_field => hit.id.as_str(),
                text_field => hit.text.as_str(),
            ))?;
        }
        writer.commit().context("Sparse index commit failed")?;

        let reader = index
            .reader()
            .context("Failed to create sparse index reader")?;

        let doc_count = docs.len();
        let docs_by_id = docs.into_iter().map(|d| (d.id.clone(), d)).collect();
        Ok(Self {
            reader,
            id_field,
            text_field,
            docs_by_id,
            doc_count,
            built_at: Utc::now(),
        })
    }

    /// BM25 search over the snapshot. Query terms are OR-combined; tokens
    /// are split on underscores to line up with Tantivy's term dictionary.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<DocumentHit>> {
        if top_k == 0 || self.doc_count == 0 {
            return Ok(Vec::new());
        }
        let clauses: Vec<(Occur, Box<dyn Query>)> = tokenize(query)
            .iter()
            .flat_map(|t| t.split('_'))
            .filter(|p| !p.is_empty())
            .map(|part| {
                let term = Term::from_field_text(self.text_field, part);
                (
                    Occur::Should,
                    Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs)) as Box<dyn Query>,
                )
            })
            .collect();
        if clauses.is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let top_docs = searcher.search(&BooleanQuery::new(clauses), &TopDocs::with_limit(top_k))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let doc: TantivyDocument = searcher.doc(addr)?;
            let Some(id) = doc.get_first(self.id_field).and_then(|v| v.as_str()) else {
                continue;
            };
            if let Some(snapshot) = self.docs_by_id.get(id) {
                let mut hit = snapshot.clone();
                hit.score = score;
                hit.rerank_score = None;
                results.push(hit);
            }
        }
        Ok(results)
    }
}

/// Process-wide cache of sparse snapshots, shared across requests.
pub struct SparseIndexCache {
    store: Arc<dyn VectorIndex>,
    entries: DashMap<CacheKey, Arc<SparseEntry>>,
    rebuild_locks: DashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>,
    config: SparseCacheConfig,
}

impl SparseIndexCache {
    pub fn new(store: Arc<dyn VectorIndex>, config: SparseCacheConfig) -> Self {
        Self {
            store,
            entries: DashMap::new(),
            rebuild_locks: DashMap::new(),
            config,
        }
    }

    fn key(collection: &str, filter: Option<&Filter>) -> CacheKey {
        (
            collection.to_string(),
            filter.map(Filter::cache_key).unwrap_or_default(),
        )
    }

    fn drifted(&self, cached_count: usize, live_count: usize) -> bool {
        let threshold = self
            .config
            .drift_min_docs
            .max((self.config.drift_fraction * live_count as f32).round() as usize);
        cached_count.abs_diff(live_count) >= threshold
    }

    /// Ranked lexical search. Degrades to an empty list when the backing
    /// collection is empty or unreachable; hybrid callers fall back to
    /// pure semantic search.
    pub async fn search(
        &self,
        collection: &str,
        query: &str,
        filter: Option<&Filter>,
        top_k: usize,
    ) -> Vec<DocumentHit> {
        let Some(entry) = self.entry(collection, filter).await else {
            return Vec::new();
        };
        match entry.search(query, top_k) {
            Ok(hits) => hits,
            Err(err) => {
                tracing::warn!(collection, error = %err, "sparse search failed, returning empty");
                Vec::new()
            }
        }
    }

    /// Current snapshot for a key, building or rebuilding as needed.
    pub async fn entry(
        &self,
        collection: &str,
        filter: Option<&Filter>,
    ) -> Option<Arc<SparseEntry>> {
        let key = Self::key(collection, filter);

        if let Some(entry) = self.entries.get(&key).map(|e| e.clone()) {
            match self.store.count(collection, filter).await {
                Ok(live) if self.drifted(entry.doc_count, live) => {
                    tracing::debug!(
                        collection,
                        cached = entry.doc_count,
                        live,
                        "sparse snapshot drifted, rebuilding"
                    );
                }
                // Count unavailable: serve the previous snapshot rather
                // than failing the lookup.
                _ => return Some(entry),
            }
        }

        match self.rebuild(collection, filter).await {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(collection, error = %err, "sparse index unavailable");
                None
            }
        }
    }

    /// Rebuild the snapshot for a key. At most one rebuild per key runs at a
    /// time; latecomers re-check freshness under the lock and reuse the
    /// winner's snapshot instead of duplicating work.
    pub async fn rebuild(
        &self,
        collection: &str,
        filter: Option<&Filter>,
    ) -> Result<Arc<SparseEntry>> {
        let key = Self::key(collection, filter);
        let lock = self
            .rebuild_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(entry) = self.entries.get(&key).map(|e| e.clone()) {
            if let Ok(live) = self.store.count(collection, filter).await {
                if !self.drifted(entry.doc_count, live) {
                    return Ok(entry);
                }
            }
        }

        let docs = self.snapshot(collection, filter).await?;
        let entry = Arc::new(SparseEntry::build(docs)?);
        tracing::info!(
            collection,
            docs = entry.doc_count,
            "sparse index snapshot rebuilt"
        );
        self.entries.insert(key, entry.clone());
        Ok(entry)
    }

    /// Bounded scroll of the live documents for a key.
    async fn snapshot(&self, collection: &str, filter: Option<&Filter>) -> Result<Vec<DocumentHit>> {
        let mut docs = Vec::new();
        let mut offset = None;
        loop {
            let remaining = self.config.max_snapshot_docs.saturating_sub(docs.len());
            if remaining == 0 {
                break;
            }
            let (page, next) = self
                .store
                .scroll(collection, filter, remaining.min(256), offset)
                .await
                .context("sparse snapshot scroll failed")?;
            for point in page {
                docs.push(DocumentHit {
                    id: point.id,
                    text: payload_text(&point.payload),
                    payload: point.payload,
                    score: 0.0,
                    rerank_score: None,
                });
            }
            match next {
                Some(n) => offset = Some(n),
                None => break,
            }
        }
        Ok(docs)
    }

    /// Cached snapshot size for a key, if one exists. Exposed for staleness
    /// introspection.
    pub fn snapshot_count(&self, collection: &str, filter: Option<&Filter>) -> Option<usize> {
        self.entries
            .get(&Self::key(collection, filter))
            .map(|e| e.doc_count)
    }
}

fn payload_text(payload: &Payload) -> String {
    payload
        .get("text")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string()
}
