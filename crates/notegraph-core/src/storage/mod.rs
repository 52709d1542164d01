//! Storage Module
//!
//! SQLite storage layer: notes, metadata payloads, FTS5 index, embedding
//! blobs, typed edges, clusters, tags, and the LLM audit trail.

pub mod migrations;
mod sqlite;

pub use sqlite::{Storage, StorageError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::note::{EpisodicMetadata, ProspectiveMetadata};

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

// ============================================================================
// EDGE RELATION
// ============================================================================

/// Typed relation between two notes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// Embedding cosine similarity above the configured floor
    Semantic,
    /// Shared WHO/WHAT/WHERE entities (weight = shared count)
    EntityLink,
    /// Tag-set Jaccard similarity above the configured floor
    TagLink,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Semantic => "semantic",
            Relation::EntityLink => "entity_link",
            Relation::TagLink => "tag_link",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "semantic" => Some(Relation::Semantic),
            "entity_link" => Some(Relation::EntityLink),
            "tag_link" => Some(Relation::TagLink),
            _ => None,
        }
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// RECORD TYPES
// ============================================================================

/// A note's graph node: identity plus the stored metadata payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub title: String,
    pub path: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub episodic: EpisodicMetadata,
    pub prospective: ProspectiveMetadata,
    pub cluster_id: Option<i64>,
}

/// A stored edge in canonical orientation (`a < b`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub a: String,
    pub b: String,
    pub relation: Relation,
    pub weight: f64,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl EdgeRecord {
    /// The endpoint opposite `note_id`
    pub fn other(&self, note_id: &str) -> &str {
        if self.a == note_id { &self.b } else { &self.a }
    }
}

/// A detected community with its LLM-generated label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub id: i64,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub size: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A hierarchical tag row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRecord {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub level: i64,
    pub use_count: i64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub source: String,
}

/// Origin of a tag assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagSource {
    User,
    Detected,
    Suggested,
}

impl TagSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagSource::User => "user",
            TagSource::Detected => "detected",
            TagSource::Suggested => "suggested",
        }
    }
}

/// One LLM invocation, for the audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmOperationRecord {
    #[serde(default)]
    pub id: i64,
    pub note_id: Option<String>,
    /// 'episodic' | 'prospective' | 'cluster_title' | 'synthesis'
    pub kind: String,
    pub prompt_text: String,
    pub raw_response: Option<String>,
    pub parsed_output_json: Option<String>,
    pub tokens_in: Option<i64>,
    pub tokens_out: Option<i64>,
    pub duration_ms: i64,
    pub cost_usd: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate graph statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_notes: i64,
    pub total_edges: i64,
    pub edges_by_relation: std::collections::BTreeMap<String, i64>,
}
