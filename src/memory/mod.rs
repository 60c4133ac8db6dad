//! Per-user semantic memory: preferences and history with reinforcement
//! and TTL-based decay.
//!
//! Records live in the `user_memory` collection of the vector store, one
//! point per record, embedded from their `memory_text`. Numeric payload
//! fields are string-encoded for portability with payload-only stores.
//!
//! Cleanup is fail-safe toward retention: records with a malformed or
//! missing `last_updated` are skipped, and an unparseable `ttl_days` falls
//! back to the default rather than forcing deletion.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::capability::TextEmbedder;
use crate::config::MemoryConfig;
use crate::index::{collections, Filter, Point, ScoredPoint, VectorIndex, DENSE_TEXT};

/// Probe text whose embedding anchors preference/history lookups.
pub const PREFERENCE_PROBE: &str = "user profile preferences history";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Preference,
    History,
}

#[derive(Debug, Clone)]
pub struct MemoryRecord {
    pub id: i64,
    pub user_id: String,
    pub kind: MemoryKind,
    pub pref_channel: Option<String>,
    pub pref_weight: u32,
    pub ttl_days: i64,
    pub last_updated: Option<DateTime<Utc>>,
    pub memory_text: String,
}

pub struct MemoryStore {
    store: Arc<dyn VectorIndex>,
    embedder: Arc<dyn TextEmbedder>,
    config: MemoryConfig,
}

impl MemoryStore {
    pub fn new(
        store: Arc<dyn VectorIndex>,
        embedder: Arc<dyn TextEmbedder>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Non-deleted records for a user, nearest-first to the preference probe.
    pub async fn records(&self, user_id: &str) -> Result<Vec<ScoredPoint>> {
        let probe = self
            .embedder
            .embed(PREFERENCE_PROBE)
            .await
            .context("probe embedding failed")?;
        let filter = Filter::new()
            .must_eq("user_id", user_id)
            .must_eq("delete_flag", false);
        self.store
            .search(
                collections::USER_MEMORY,
                DENSE_TEXT,
                &probe,
                Some(&filter),
                self.config.lookup_limit,
            )
            .await
    }

    /// The user's channel preference record, if any.
    pub async fn get_preference(&self, user_id: &str) -> Result<Option<MemoryRecord>> {
        let hits = self.records(user_id).await?;
        Ok(hits.iter().find_map(|p| {
            let record = parse_record(p)?;
            (record.kind == MemoryKind::Preference).then_some(record)
        }))
    }

    /// Reinforce a channel preference.
    ///
    /// Creates a weight-1 record when none exists. Otherwise increments the
    /// weight and overwrites the channel with the latest reinforced value;
    /// the newest signal always wins the channel field, while the weight
    /// keeps counting repetitions.
    pub async fn reinforce(&self, user_id: &str, channel: &str, ttl_days: i64) -> Result<()> {
        match self.get_preference(user_id).await? {
            None => {
                let text = format!("Preference: user tends to use {channel}");
                self.upsert_record(None, user_id, MemoryKind::Preference, channel, 1, ttl_days, &text)
                    .await
            }
            Some(existing) => {
                let weight = existing.pref_weight + 1;
                let text =
                    format!("Preference: user tends to use {channel} (reinforced x{weight})");
                self.upsert_record(
                    Some(existing.id),
                    user_id,
                    MemoryKind::Preference,
                    channel,
                    weight,
                    existing.ttl_days,
                    &text,
                )
                .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn upsert_record(
        &self,
        id: Option<i64>,
        user_id: &str,
        kind: MemoryKind,
        channel: &str,
        weight: u32,
        ttl_days: i64,
        memory_text: &str,
    ) -> Result<()> {
        let id = id.unwrap_or_else(|| Utc::now().timestamp_micros());
        let vector = self
            .embedder
            .embed(memory_text)
            .await
            .context("memory embedding failed")?;

        let kind_str = match kind {
            MemoryKind::Preference => "preference",
            MemoryKind::History => "history",
        };
        let payload = [
            ("user_id", json!(user_id)),
            ("delete_flag", json!(false)),
            ("type", json!(kind_str)),
            ("pref_channel", json!(channel)),
            ("pref_weight", json!(weight.to_string())),
            ("ttl_days", json!(ttl_days.to_string())),
            ("last_updated", json!(Utc::now().to_rfc3339())),
            ("memory_text", json!(memory_text)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        self.store
            .upsert(
                collections::USER_MEMORY,
                vec![Point {
                    id: id.to_string(),
                    vectors: HashMap::from([(DENSE_TEXT.to_string(), vector)]),
                    payload,
                }],
            )
            .await
            .context("memory upsert failed")
    }

    /// Delete expired records, optionally scoped to one user. Idempotent and
    /// cheap when nothing is expired. Returns the number deleted.
    pub async fn decay_cleanup(&self, user_id: Option<&str>, now: DateTime<Utc>) -> Result<usize> {
        let filter = user_id.map(|u| Filter::new().must_eq("user_id", u));

        let mut expired: Vec<String> = Vec::new();
        let mut scanned = 0usize;
        let mut offset = None;
        loop {
            let remaining = self.config.scan_limit.saturating_sub(scanned);
            if remaining == 0 {
                break;
            }
            let (page, next) = self
                .store
                .scroll(
                    collections::USER_MEMORY,
                    filter.as_ref(),
                    remaining.min(256),
                    offset,
                )
                .await
                .context("memory scan failed")?;
            scanned += page.len();

            for point in &page {
                let ttl = point
                    .payload
                    .get("ttl_days")
                    .and_then(parse_flexible_i64)
                    .unwrap_or(180);
                // Missing or malformed timestamp: retain.
                let Some(last_updated) = point
                    .payload
                    .get("last_updated")
                    .and_then(serde_json::Value::as_str)
                    .and_then(parse_timestamp)
                else {
                    continue;
                };
                if now - last_updated > Duration::days(ttl) {
                    expired.push(point.id.clone());
                }
            }
            match next {
                Some(n) => offset = Some(n),
                None => break,
            }
        }

        if !expired.is_empty() {
            self.store
                .delete(collections::USER_MEMORY, &expired)
                .await
                .context("memory delete failed")?;
            tracing::info!(deleted = expired.len(), "expired memory records removed");
        }
        Ok(expired.len())
    }

    /// Right-to-erasure: remove every record for a user, TTL notwithstanding.
    pub async fn delete_user(&self, user_id: &str) -> Result<()> {
        self.store
            .delete_by_filter(
                collections::USER_MEMORY,
                &Filter::new().must_eq("user_id", user_id),
            )
            .await
            .context("user memory erasure failed")
    }
}

fn parse_record(point: &ScoredPoint) -> Option<MemoryRecord> {
    let get_str = |key: &str| {
        point
            .payload
            .get(key)
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    };

    let kind = match get_str("type")?.as_str() {
        "preference" => MemoryKind::Preference,
        "history" => MemoryKind::History,
        _ => return None,
    };

    Some(MemoryRecord {
        id: point.id.parse().ok()?,
        user_id: get_str("user_id")?,
        kind,
        pref_channel: get_str("pref_channel"),
        pref_weight: point
            .payload
            .get("pref_weight")
            .and_then(parse_flexible_i64)
            .and_then(|w| u32::try_from(w).ok())
            .unwrap_or(1),
        ttl_days: point
            .payload
            .get("ttl_days")
            .and_then(parse_flexible_i64)
            .unwrap_or(180),
        last_updated: point
            .payload
            .get("last_updated")
            .and_then(serde_json::Value::as_str)
            .and_then(parse_timestamp),
        memory_text: get_str("memory_text").unwrap_or_default(),
    })
}

fn parse_flexible_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::HashingTextEmbedder;
    use crate::index::{engine_collections, InMemoryIndex, TEXT_DIM};

    async fn store() -> MemoryStore {
        let index = Arc::new(InMemoryIndex::new());
        index.ensure_collections(&engine_collections()).await.unwrap();
        MemoryStore::new(
            index,
            Arc::new(HashingTextEmbedder::default()),
            MemoryConfig::default(),
        )
    }

    /// Insert a raw record with a controlled payload, bypassing reinforce.
    async fn seed_raw(
        memory: &MemoryStore,
        id: i64,
        user: &str,
        ttl_days: Option<&str>,
        last_updated: Option<String>,
    ) {
        let mut payload: crate::types::Payload = [
            ("user_id".to_string(), json!(user)),
            ("delete_flag".to_string(), json!(false)),
            ("type".to_string(), json!("history")),
            ("memory_text".to_string(), json!("visited portal")),
        ]
        .into_iter()
        .collect();
        if let Some(ttl) = ttl_days {
            payload.insert("ttl_days".to_string(), json!(ttl));
        }
        if let Some(lu) = last_updated {
            payload.insert("last_updated".to_string(), json!(lu));
        }
        memory
            .store
            .upsert(
                collections::USER_MEMORY,
                vec![Point {
                    id: id.to_string(),
                    vectors: HashMap::from([(DENSE_TEXT.to_string(), vec![0.1; TEXT_DIM])]),
                    payload,
                }],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reinforce_creates_then_accumulates_with_latest_channel() {
        let memory = store().await;

        memory.reinforce("u1", "helpline", 180).await.unwrap();
        memory.reinforce("u1", "helpline", 180).await.unwrap();
        memory.reinforce("u1", "email", 180).await.unwrap();

        let pref = memory.get_preference("u1").await.unwrap().unwrap();
        assert_eq!(pref.pref_weight, 3);
        assert_eq!(pref.pref_channel.as_deref(), Some("email"));
    }

    #[tokio::test]
    async fn preference_is_scoped_per_user() {
        let memory = store().await;
        memory.reinforce("u1", "portal", 180).await.unwrap();

        assert!(memory.get_preference("u2").await.unwrap().is_none());
        assert!(memory.get_preference("u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn decay_deletes_expired_and_retains_fresh() {
        let memory = store().await;
        let now = Utc::now();
        let old = (now - Duration::days(200)).to_rfc3339();

        seed_raw(&memory, 1, "u1", Some("180"), Some(old.clone())).await;
        seed_raw(&memory, 2, "u1", Some("365"), Some(old)).await;

        let deleted = memory.decay_cleanup(Some("u1"), now).await.unwrap();
        assert_eq!(deleted, 1);

        // Second pass is a no-op.
        assert_eq!(memory.decay_cleanup(Some("u1"), now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn malformed_fields_fail_safe_toward_retention() {
        let memory = store().await;
        let now = Utc::now();
        let old = (now - Duration::days(200)).to_rfc3339();

        // No timestamp: skip. Unparseable timestamp: skip.
        seed_raw(&memory, 1, "u1", Some("180"), None).await;
        seed_raw(&memory, 2, "u1", Some("180"), Some("not-a-date".into())).await;
        // Unparseable ttl: assume the 180-day default, so this one expires.
        seed_raw(&memory, 3, "u1", Some("soon"), Some(old)).await;

        assert_eq!(memory.decay_cleanup(Some("u1"), now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_user_bypasses_ttl() {
        let memory = store().await;
        memory.reinforce("u1", "portal", 180).await.unwrap();
        seed_raw(&memory, 9, "u1", Some("36500"), Some(Utc::now().to_rfc3339())).await;

        memory.delete_user("u1").await.unwrap();
        assert!(memory.records("u1").await.unwrap().is_empty());
    }
}
