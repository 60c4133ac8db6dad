use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub sparse: SparseCacheConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub features: FeatureFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Candidates fetched from the knowledge base per request.
    pub kb_top_k: usize,
    pub directory_top_k: usize,
    pub case_top_k: usize,
    pub template_top_k: usize,
    /// RRF constant; higher flattens the rank contribution curve.
    pub rrf_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            kb_top_k: 8,
            directory_top_k: 3,
            case_top_k: 3,
            template_top_k: 6,
            rrf_k: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparseCacheConfig {
    /// Upper bound on documents snapshotted per (collection, filter) key.
    pub max_snapshot_docs: usize,
    /// Rebuild when the live count drifts by at least
    /// max(drift_min_docs, round(drift_fraction * live_count)).
    pub drift_min_docs: usize,
    pub drift_fraction: f32,
}

impl Default for SparseCacheConfig {
    fn default() -> Self {
        Self {
            max_snapshot_docs: 5000,
            drift_min_docs: 3,
            drift_fraction: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Default TTL for preference records, in days.
    pub preference_ttl_days: i64,
    /// Records fetched per preference lookup.
    pub lookup_limit: usize,
    /// Upper bound on records scanned per decay-cleanup pass.
    pub scan_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            preference_ttl_days: 180,
            lookup_limit: 20,
            scan_limit: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_text_chars: usize,
    /// Evidence excerpt length.
    pub snippet_chars: usize,
    /// Similar-case tip excerpt length.
    pub tip_chars: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_text_chars: 4000,
            snippet_chars: 240,
            tip_chars: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub enable_hybrid: bool,
    pub enable_rerank: bool,
    pub enable_ocr: bool,
    pub enable_image_hints: bool,
    /// Request a prose rendering of final decisions when a renderer is wired.
    pub enable_render: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_hybrid: true,
            enable_rerank: true,
            enable_ocr: true,
            enable_image_hints: true,
            enable_render: false,
        }
    }
}

impl EngineConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.search.kb_top_k == 0 {
            return Err("search.kb_top_k must be > 0".into());
        }
        if self.search.rrf_k == 0 {
            return Err("search.rrf_k must be > 0".into());
        }
        if self.sparse.max_snapshot_docs == 0 {
            return Err("sparse.max_snapshot_docs must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.sparse.drift_fraction) {
            return Err("sparse.drift_fraction must be in [0.0, 1.0]".into());
        }
        if self.memory.preference_ttl_days <= 0 {
            return Err("memory.preference_ttl_days must be > 0".into());
        }
        if self.limits.max_text_chars == 0 {
            return Err("limits.max_text_chars must be > 0".into());
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }
}
