//! Runtime Configuration
//!
//! A single configuration object covers every tunable the engine exposes:
//! filesystem locations, inference endpoints, edge thresholds, search fusion
//! weights, and LLM timeouts. Thresholds are fields rather than constants so
//! a deployment can recalibrate without recompiling.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default cosine similarity floor for `semantic` edges.
/// 0.7 produced zero edges on real prose; 0.5 yields connections that hold
/// up under manual inspection.
pub const DEFAULT_SEMANTIC_THRESHOLD: f32 = 0.5;

/// Default Jaccard floor for `tag_link` edges. An earlier iteration used 0.5
/// and over-filtered common thematic pairs; 0.3 is the calibrated floor.
pub const DEFAULT_TAG_JACCARD_THRESHOLD: f32 = 0.3;

/// Default Louvain resolution.
pub const DEFAULT_CLUSTER_RESOLUTION: f64 = 1.0;

/// Default and maximum graph-expansion hops for hybrid search.
pub const DEFAULT_EXPANSION_HOPS: u32 = 1;
pub const MAX_EXPANSION_HOPS: u32 = 2;

/// Default search fusion weights. Empirical; must sum to 1.0.
pub const DEFAULT_FTS_WEIGHT: f32 = 0.4;
pub const DEFAULT_VECTOR_WEIGHT: f32 = 0.6;

/// Default per-call LLM timeout in seconds.
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 30;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding flat `*.md` note files
    pub notes_dir: PathBuf,
    /// SQLite database file (tables, FTS indexes, embedding blobs)
    pub db_path: PathBuf,
    /// OpenAI-compatible chat endpoint of the local LLM
    pub llm_endpoint: String,
    /// Model name passed to the LLM endpoint
    pub llm_model: String,
    /// Embedding endpoint of the local embedding model
    pub embedding_endpoint: String,
    /// Embedding model id
    pub embedding_model: String,
    /// Embedding dimension; fixed once per corpus
    pub embedding_dimensions: usize,
    /// Cosine similarity floor for semantic edges
    pub semantic_threshold: f32,
    /// Jaccard floor for tag_link edges
    pub tag_jaccard_threshold: f32,
    /// Louvain resolution for community detection
    pub cluster_resolution: f64,
    /// Default graph-expansion hops (hard cap [`MAX_EXPANSION_HOPS`])
    pub max_expansion_hops: u32,
    /// Weight of the full-text score in hybrid fusion
    pub fts_weight: f32,
    /// Weight of the vector score in hybrid fusion
    pub vector_weight: f32,
    /// Per-call LLM timeout in seconds
    pub llm_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let notes_dir = default_notes_dir();
        let db_path = notes_dir.join(".index").join("notegraph.db");
        Self {
            notes_dir,
            db_path,
            llm_endpoint: "http://127.0.0.1:11434".to_string(),
            llm_model: "qwen2.5:7b".to_string(),
            embedding_endpoint: "http://127.0.0.1:11434".to_string(),
            embedding_model: "all-minilm".to_string(),
            embedding_dimensions: 384,
            semantic_threshold: DEFAULT_SEMANTIC_THRESHOLD,
            tag_jaccard_threshold: DEFAULT_TAG_JACCARD_THRESHOLD,
            cluster_resolution: DEFAULT_CLUSTER_RESOLUTION,
            max_expansion_hops: DEFAULT_EXPANSION_HOPS,
            fts_weight: DEFAULT_FTS_WEIGHT,
            vector_weight: DEFAULT_VECTOR_WEIGHT,
            llm_timeout_secs: DEFAULT_LLM_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// LLM timeout as a [`Duration`]
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    /// Clamp requested expansion hops to the configured default and hard cap
    pub fn clamp_hops(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.max_expansion_hops)
            .min(MAX_EXPANSION_HOPS)
    }
}

/// Resolve the default notes directory: `~/Notes`, falling back to the
/// platform data directory when no home directory exists.
fn default_notes_dir() -> PathBuf {
    if let Some(base) = directories::BaseDirs::new() {
        return base.home_dir().join("Notes");
    }
    if let Some(proj) = directories::ProjectDirs::from("io", "notegraph", "notegraph") {
        return proj.data_dir().to_path_buf();
    }
    PathBuf::from("./Notes")
}
