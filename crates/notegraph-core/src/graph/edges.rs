//! Edge builder
//!
//! Creates the three edge classes for one newly-embedded note:
//!
//! - `semantic`: embedding cosine similarity at or above the configured
//!   floor (default 0.5); weight is the similarity.
//! - `entity_link`: non-empty overlap of normalized WHO ∪ WHAT ∪ WHERE
//!   entities; weight is the overlap size, metadata lists the shared
//!   entities.
//! - `tag_link`: tag-set Jaccard at or above the configured floor (default
//!   0.3); weight is the coefficient, metadata lists the shared tags.
//!
//! Existing edges are never retroactively modified; re-running for a note
//! only fills in missing edges (insert is a no-op on duplicates).

use std::collections::BTreeSet;

use serde_json::json;

use crate::config::Config;
use crate::embedding::dot_product;
use crate::storage::{Relation, Storage};
use crate::tags::normalize_tag_name;

use super::{GraphError, Result};

/// Counts of edges created in one builder run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EdgeStats {
    pub semantic: usize,
    pub entity: usize,
    pub tag: usize,
}

impl EdgeStats {
    pub fn total(&self) -> usize {
        self.semantic + self.entity + self.tag
    }
}

impl std::fmt::Display for EdgeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "semantic={} entity_link={} tag_link={}",
            self.semantic, self.entity, self.tag
        )
    }
}

/// Normalize an entity string for comparison: case- and delimiter-
/// insensitive, so "AI Research" ≡ "ai-research" ≡ "ai_research".
pub fn normalize_entity(entity: &str) -> String {
    entity
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Build all three edge classes for `note_id` against the rest of the
/// corpus. The caller serializes concurrent builders per note id; this
/// function reads committed state only.
pub fn build_edges_for_note(
    storage: &Storage,
    config: &Config,
    note_id: &str,
) -> Result<EdgeStats> {
    let node = storage
        .get_node(note_id)?
        .ok_or_else(|| GraphError::NoteNotFound(note_id.to_string()))?;
    let embedding = storage
        .get_embedding(note_id)?
        .ok_or_else(|| GraphError::MissingEmbedding(note_id.to_string()))?;

    let mut stats = EdgeStats::default();

    // Semantic edges: one pass over all other embeddings (unit vectors, so
    // dot product is cosine)
    for (other_id, other_vec) in storage.all_embeddings(Some(note_id))? {
        let similarity = dot_product(&embedding, &other_vec);
        if similarity >= config.semantic_threshold {
            if storage.insert_edge(
                note_id,
                &other_id,
                Relation::Semantic,
                similarity as f64,
                None,
            )? {
                stats.semantic += 1;
            }
        }
    }

    // Entity and tag edges: one pass over all other nodes' metadata
    let my_entities: BTreeSet<String> =
        node.episodic.entities().map(normalize_entity).collect();
    let my_tags: BTreeSet<String> = node
        .episodic
        .tags
        .iter()
        .map(|t| normalize_tag_name(t))
        .collect();

    for other in storage.list_nodes()? {
        if other.id == note_id {
            continue;
        }

        if !my_entities.is_empty() {
            let other_entities: BTreeSet<String> =
                other.episodic.entities().map(normalize_entity).collect();
            let shared: Vec<&String> = my_entities.intersection(&other_entities).collect();
            if !shared.is_empty() {
                let metadata = json!({ "shared_entities": shared });
                if storage.insert_edge(
                    note_id,
                    &other.id,
                    Relation::EntityLink,
                    shared.len() as f64,
                    Some(&metadata),
                )? {
                    stats.entity += 1;
                }
            }
        }

        if !my_tags.is_empty() {
            let other_tags: BTreeSet<String> = other
                .episodic
                .tags
                .iter()
                .map(|t| normalize_tag_name(t))
                .collect();
            if !other_tags.is_empty() {
                let shared: Vec<&String> = my_tags.intersection(&other_tags).collect();
                let union = my_tags.union(&other_tags).count();
                let jaccard = shared.len() as f64 / union as f64;
                if jaccard >= config.tag_jaccard_threshold as f64 {
                    let metadata = json!({ "shared_tags": shared });
                    if storage.insert_edge(
                        note_id,
                        &other.id,
                        Relation::TagLink,
                        jaccard,
                        Some(&metadata),
                    )? {
                        stats.tag += 1;
                    }
                }
            }
        }
    }

    tracing::debug!(note_id, %stats, "Edge build complete");
    Ok(stats)
}

// ============================================================================
// TESTS
// ============================================================================
