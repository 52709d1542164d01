//! Hybrid Retrieval
//!
//! Fuses FTS5 keyword ranking with dense-vector cosine similarity, expands
//! the result set along typed graph edges, and attaches cluster context.
//! Identical inputs over an unchanged corpus return identical orderings:
//! every sort in this module carries a total tie-break.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::embedding::{top_k_similar, EmbeddingClient};
use crate::storage::{Relation, Result, Storage};

/// Candidate pool multiplier: each scoring source contributes up to `4·k`
const CANDIDATE_MULTIPLIER: usize = 4;

/// Per-hop decay beyond the first hop
const HOP_DECAY: f64 = 0.5;

/// Query-embedding cache capacity
const QUERY_CACHE_SIZE: usize = 100;

// ============================================================================
// FTS QUERY SANITIZATION
// ============================================================================

/// Sanitize a raw user query for FTS5 MATCH. Quoted phrases and the
/// AND/OR/NOT operators pass through; every other token is quoted so FTS5
/// syntax characters cannot break the query.
pub fn sanitize_fts5_query(query: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut rest = query.trim();

    while !rest.is_empty() {
        if let Some(stripped) = rest.strip_prefix('"') {
            // Phrase query: keep verbatim through the closing quote
            match stripped.find('"') {
                Some(end) => {
                    let phrase = &stripped[..end];
                    if !phrase.trim().is_empty() {
                        parts.push(format!("\"{}\"", phrase.replace('"', "")));
                    }
                    rest = stripped[end + 1..].trim_start();
                }
                None => {
                    rest = stripped;
                }
            }
            continue;
        }

        let token_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let token = &rest[..token_end];
        rest = rest[token_end..].trim_start();

        match token {
            "AND" | "OR" | "NOT" => parts.push(token.to_string()),
            _ => {
                let cleaned: String = token
                    .chars()
                    .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
                    .collect();
                if !cleaned.is_empty() {
                    parts.push(format!("\"{}\"", cleaned));
                }
            }
        }
    }

    // A trailing operator would be a syntax error
    while matches!(parts.last().map(String::as_str), Some("AND" | "OR" | "NOT")) {
        parts.pop();
    }
    parts.join(" ")
}

// ============================================================================
// RESULT TYPES
// ============================================================================

/// Search request parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchOptions {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_expand")]
    pub expand_graph: bool,
    #[serde(default)]
    pub hops: Option<u32>,
}

fn default_top_k() -> usize {
    10
}

fn default_expand() -> bool {
    true
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            expand_graph: default_expand(),
            hops: None,
        }
    }
}

/// A fused primary result
#[derive(Debug, Clone, Serialize)]
pub struct PrimaryResult {
    pub id: String,
    pub title: String,
    pub snippet: Option<String>,
    pub fts_score: f64,
    pub vector_score: f64,
    pub score: f64,
    pub cluster_id: Option<i64>,
    pub created: DateTime<Utc>,
}

/// A note reached by graph expansion
#[derive(Debug, Clone, Serialize)]
pub struct ExpandedResult {
    pub id: String,
    pub title: String,
    pub relation: Relation,
    pub hop_distance: u32,
    pub parent_id: String,
    pub relevance: f64,
}

/// Cluster context attached to a response
#[derive(Debug, Clone, Serialize)]
pub struct ClusterContext {
    pub id: i64,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub size: i64,
}

/// Full retrieval response
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub primary: Vec<PrimaryResult>,
    pub expanded: Vec<ExpandedResult>,
    pub clusters: Vec<ClusterContext>,
    pub total_results: usize,
    pub execution_time_ms: u64,
}

// ============================================================================
// RETRIEVER
// ============================================================================

/// Hybrid retriever with a query-embedding LRU cache
pub struct HybridRetriever {
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl Default for HybridRetriever {
    fn default() -> Self {
        Self::new()
    }
}

impl HybridRetriever {
    pub fn new() -> Self {
        Self {
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_SIZE).expect("cache size is non-zero"),
            )),
        }
    }

    /// Run a hybrid search. The vector side degrades gracefully: when the
    /// embedding endpoint is unavailable, results come from FTS alone.
    pub async fn search(
        &self,
        storage: &Storage,
        embedder: &EmbeddingClient,
        config: &Config,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        let started = Instant::now();
        let k = options.top_k.max(1);
        let pool = k * CANDIDATE_MULTIPLIER;

        // --- Text scoring, normalized to [0,1] by the top score ---
        let fts_raw = storage.fts_search(query, pool)?;
        let fts_top = fts_raw.first().map(|(_, s, _)| *s).unwrap_or(0.0).max(f64::MIN_POSITIVE);
        let mut fts_scores: std::collections::HashMap<String, (f64, String)> =
            std::collections::HashMap::new();
        for (id, score, snippet) in fts_raw {
            fts_scores.insert(id, ((score / fts_top).clamp(0.0, 1.0), snippet));
        }

        // --- Vector scoring (already in [0,1] for unit vectors) ---
        let mut vector_scores: std::collections::HashMap<String, f64> =
            std::collections::HashMap::new();
        match self.query_embedding(embedder, query).await {
            Some(query_vec) => {
                // Strictly positive floor: a zero-similarity note is not a
                // candidate, it is noise
                let corpus = storage.all_embeddings(None)?;
                for (id, similarity) in top_k_similar(&query_vec, &corpus, pool, f32::EPSILON) {
                    vector_scores.insert(id, (similarity as f64).clamp(0.0, 1.0));
                }
            }
            None => {
                tracing::warn!("Query embedding unavailable, falling back to FTS-only scoring");
            }
        }

        // --- Fusion: w_fts · fts + w_vec · vec, missing component scores 0 ---
        let mut candidate_ids: Vec<String> = fts_scores
            .keys()
            .chain(vector_scores.keys())
            .cloned()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        let created = storage.created_map(&candidate_ids)?;
        candidate_ids.retain(|id| created.contains_key(id));

        let w_fts = config.fts_weight as f64;
        let w_vec = config.vector_weight as f64;
        let mut fused: Vec<(String, f64)> = candidate_ids
            .into_iter()
            .map(|id| {
                let fts = fts_scores.get(&id).map(|(s, _)| *s).unwrap_or(0.0);
                let vec = vector_scores.get(&id).copied().unwrap_or(0.0);
                (id, w_fts * fts + w_vec * vec)
            })
            .collect();

        // Ties break by newer creation, then lower id — deterministic
        fused.sort_by(|x, y| {
            y.1.partial_cmp(&x.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| created[&y.0].cmp(&created[&x.0]))
                .then_with(|| x.0.cmp(&y.0))
        });
        fused.truncate(k);

        let mut primary = Vec::with_capacity(fused.len());
        for (id, score) in &fused {
            let Some(node) = storage.get_node(id)? else {
                continue;
            };
            primary.push(PrimaryResult {
                id: id.clone(),
                title: node.title,
                snippet: fts_scores.get(id).map(|(_, snip)| snip.clone()),
                fts_score: fts_scores.get(id).map(|(s, _)| *s).unwrap_or(0.0),
                vector_score: vector_scores.get(id).copied().unwrap_or(0.0),
                score: *score,
                cluster_id: node.cluster_id,
                created: node.created,
            });
        }

        // --- Graph expansion ---
        let expanded = if options.expand_graph {
            let hops = config.clamp_hops(options.hops);
            self.expand(storage, &primary, hops)?
        } else {
            Vec::new()
        };

        // --- Cluster context for primaries ---
        let mut clusters = Vec::new();
        let mut seen_clusters = std::collections::BTreeSet::new();
        for result in &primary {
            if let Some(cluster_id) = result.cluster_id {
                if seen_clusters.insert(cluster_id) {
                    if let Some(cluster) = storage.get_cluster(cluster_id)? {
                        clusters.push(ClusterContext {
                            id: cluster.id,
                            title: cluster.title,
                            summary: cluster.summary,
                            size: cluster.size,
                        });
                    }
                }
            }
        }

        let total_results = primary.len() + expanded.len();
        Ok(SearchResponse {
            query: query.to_string(),
            primary,
            expanded,
            clusters,
            total_results,
            execution_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn query_embedding(
        &self,
        embedder: &EmbeddingClient,
        query: &str,
    ) -> Option<Vec<f32>> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(cached) = cache.get(query) {
                return Some(cached.clone());
            }
        }
        match embedder.embed(query).await {
            Ok(vector) => {
                if let Ok(mut cache) = self.query_cache.lock() {
                    cache.put(query.to_string(), vector.clone());
                }
                Some(vector)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to embed query");
                None
            }
        }
    }

    /// BFS along typed edges from the primary set, up to `hops` hops. Edge
    /// traversal priority: entity_link > semantic > tag_link, then weight,
    /// then target id. An expanded note inherits
    /// `parent_score · edge_weight · decay(hop)` where decay halves per hop
    /// beyond the first; entity weights are normalized into (0,1] first.
    fn expand(
        &self,
        storage: &Storage,
        primary: &[PrimaryResult],
        hops: u32,
    ) -> Result<Vec<ExpandedResult>> {
        let mut visited: std::collections::HashSet<String> =
            primary.iter().map(|p| p.id.clone()).collect();
        let mut frontier: Vec<(String, f64)> = primary
            .iter()
            .map(|p| (p.id.clone(), p.score))
            .collect();
        let mut expanded: Vec<ExpandedResult> = Vec::new();

        for hop in 1..=hops {
            let decay = HOP_DECAY.powi(hop as i32 - 1);
            let mut next_frontier: Vec<(String, f64)> = Vec::new();

            for (parent_id, parent_score) in &frontier {
                let mut edges = storage.edges_for_note(parent_id)?;
                edges.sort_by(|x, y| {
                    relation_priority(x.relation)
                        .cmp(&relation_priority(y.relation))
                        .then_with(|| {
                            y.weight
                                .partial_cmp(&x.weight)
                                .unwrap_or(std::cmp::Ordering::Equal)
                        })
                        .then_with(|| x.other(parent_id).cmp(y.other(parent_id)))
                });

                for edge in edges {
                    let target = edge.other(parent_id).to_string();
                    if !visited.insert(target.clone()) {
                        continue;
                    }
                    let edge_weight = match edge.relation {
                        Relation::EntityLink => edge.weight / (edge.weight + 1.0),
                        _ => edge.weight,
                    };
                    let relevance = (parent_score * edge_weight * decay).clamp(0.0, 1.0);

                    let Some(node) = storage.get_node(&target)? else {
                        continue;
                    };
                    expanded.push(ExpandedResult {
                        id: target.clone(),
                        title: node.title,
                        relation: edge.relation,
                        hop_distance: hop,
                        parent_id: parent_id.clone(),
                        relevance,
                    });
                    next_frontier.push((target, relevance));
                }
            }

            frontier = next_frontier;
            if frontier.is_empty() {
                break;
            }
        }

        expanded.sort_by(|x, y| {
            y.relevance
                .partial_cmp(&x.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| x.hop_distance.cmp(&y.hop_distance))
                .then_with(|| x.id.cmp(&y.id))
        });
        Ok(expanded)
    }
}

fn relation_priority(relation: Relation) -> u8 {
    match relation {
        Relation::EntityLink => 0,
        Relation::Semantic => 1,
        Relation::TagLink => 2,
    }
}

// ============================================================================
// TESTS
// ============================================================================
