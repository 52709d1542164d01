//! Community detection
//!
//! Builds an in-memory undirected weighted graph from the persisted edges,
//! runs Louvain modularity maximization, and labels each community of two
//! or more notes with one constrained LLM call. Cluster state is replaced
//! atomically; a detection run never mutates edges.
//!
//! Weight mixing: `entity_link` weights are integers ≥ 1 while the other
//! relations live in (0, 1], so entity weights are normalized as
//! `w / (w + 1)` before entering the modularity computation. The choice is
//! constant across runs of the same corpus. Parallel edges between a pair
//! (different relations) sum.

use std::collections::HashMap;

use chrono::Utc;

use crate::llm::{extract_json_object, LlmClient};
use crate::storage::{ClusterRecord, LlmOperationRecord, Relation, Storage};

use super::Result;

/// Result of one clustering run
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ClusterOutcome {
    pub clusters_created: usize,
    pub total_nodes: usize,
}

/// Member titles sampled into a labeling prompt
const LABEL_SAMPLE: usize = 8;

/// Lines of body sampled per member
const LABEL_BODY_LINES: usize = 2;

// ============================================================================
// LOUVAIN
// ============================================================================

/// Louvain community detection over an undirected weighted graph.
///
/// `edges` are `(u, v, weight)` with `u != v`; parallel entries sum. Returns
/// a community index per node. Deterministic: nodes are swept in index
/// order and ties resolve to the lowest community id, so the same graph
/// always yields the same partition.
pub fn louvain_partition(n: usize, edges: &[(usize, usize, f64)], resolution: f64) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }

    // Combine parallel edges
    let mut combined: HashMap<(usize, usize), f64> = HashMap::new();
    for &(u, v, w) in edges {
        if u == v || w <= 0.0 {
            continue;
        }
        let key = if u < v { (u, v) } else { (v, u) };
        *combined.entry(key).or_default() += w;
    }

    // node -> final community, refined level by level
    let mut membership: Vec<usize> = (0..n).collect();
    let mut adjacency: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    let mut self_loops: Vec<f64> = vec![0.0; n];
    for (&(u, v), &w) in combined.iter() {
        adjacency[u].push((v, w));
        adjacency[v].push((u, w));
    }
    for list in &mut adjacency {
        list.sort_by(|a, b| a.0.cmp(&b.0));
    }

    loop {
        let (local, improved) = one_level(&adjacency, &self_loops, resolution);
        if !improved {
            break;
        }

        // Compact community labels in order of first appearance
        let mut relabel: HashMap<usize, usize> = HashMap::new();
        let mut compact = vec![0usize; local.len()];
        for (node, &community) in local.iter().enumerate() {
            let next = relabel.len();
            let label = *relabel.entry(community).or_insert(next);
            compact[node] = label;
        }
        let communities = relabel.len();

        for m in membership.iter_mut() {
            *m = compact[*m];
        }
        if communities == local.len() {
            break;
        }

        // Aggregate the graph: communities become nodes
        let mut new_self = vec![0.0f64; communities];
        let mut new_edges: HashMap<(usize, usize), f64> = HashMap::new();
        for (u, list) in adjacency.iter().enumerate() {
            let cu = compact[u];
            new_self[cu] += self_loops[u];
            for &(v, w) in list {
                if v < u {
                    continue; // each undirected edge once
                }
                let cv = compact[v];
                if cu == cv {
                    new_self[cu] += w;
                } else {
                    let key = if cu < cv { (cu, cv) } else { (cv, cu) };
                    *new_edges.entry(key).or_default() += w;
                }
            }
        }

        adjacency = vec![Vec::new(); communities];
        self_loops = new_self;
        for (&(u, v), &w) in new_edges.iter() {
            adjacency[u].push((v, w));
            adjacency[v].push((u, w));
        }
        for list in &mut adjacency {
            list.sort_by(|a, b| a.0.cmp(&b.0));
        }
    }

    membership
}

/// One Louvain level: greedy local moves until a full sweep moves nothing.
/// Returns the node → community map and whether anything moved at all.
fn one_level(
    adjacency: &[Vec<(usize, f64)>],
    self_loops: &[f64],
    resolution: f64,
) -> (Vec<usize>, bool) {
    let n = adjacency.len();
    let degree: Vec<f64> = (0..n)
        .map(|i| adjacency[i].iter().map(|&(_, w)| w).sum::<f64>() + 2.0 * self_loops[i])
        .collect();
    let two_m: f64 = degree.iter().sum();
    if two_m <= 0.0 {
        return ((0..n).collect(), false);
    }

    let mut community: Vec<usize> = (0..n).collect();
    let mut sum_tot: Vec<f64> = degree.clone();
    let mut any_moved = false;

    loop {
        let mut moved_this_sweep = false;

        for node in 0..n {
            let current = community[node];

            // Weight from this node to each neighboring community
            let mut to_community: HashMap<usize, f64> = HashMap::new();
            for &(neighbor, w) in &adjacency[node] {
                *to_community.entry(community[neighbor]).or_default() += w;
            }

            sum_tot[current] -= degree[node];
            let own_link = to_community.get(&current).copied().unwrap_or(0.0);
            let stay_gain = own_link - resolution * degree[node] * sum_tot[current] / two_m;

            // Deterministic scan: candidate communities in ascending order
            let mut candidates: Vec<(usize, f64)> = to_community.into_iter().collect();
            candidates.sort_by(|a, b| a.0.cmp(&b.0));

            let mut best = current;
            let mut best_gain = stay_gain;
            for (candidate, link) in candidates {
                if candidate == current {
                    continue;
                }
                let gain = link - resolution * degree[node] * sum_tot[candidate] / two_m;
                if gain > best_gain + 1e-12 {
                    best = candidate;
                    best_gain = gain;
                }
            }

            sum_tot[best] += degree[node];
            if best != current {
                community[node] = best;
                moved_this_sweep = true;
                any_moved = true;
            }
        }

        if !moved_this_sweep {
            break;
        }
    }

    (community, any_moved)
}

// ============================================================================
// DETECTION PIPELINE
// ============================================================================

/// Run the full detection pipeline: snapshot edges, partition, label
/// communities of size ≥ 2 via the LLM, persist atomically. Isolated notes
/// receive singleton clusters with null labels.
pub async fn detect_communities(
    storage: &Storage,
    llm: &LlmClient,
    resolution: f64,
) -> Result<ClusterOutcome> {
    let mut nodes = storage.list_nodes()?;
    nodes.sort_by(|a, b| a.id.cmp(&b.id));
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    // Snapshot read; writers proceed unaffected while we compute
    let mut edges = Vec::new();
    let mut weight_between: HashMap<(usize, usize), f64> = HashMap::new();
    for edge in storage.all_edges()? {
        let (Some(&u), Some(&v)) = (index.get(edge.a.as_str()), index.get(edge.b.as_str()))
        else {
            continue;
        };
        let weight = match edge.relation {
            Relation::EntityLink => edge.weight / (edge.weight + 1.0),
            Relation::Semantic | Relation::TagLink => edge.weight,
        };
        edges.push((u, v, weight));
        let key = if u < v { (u, v) } else { (v, u) };
        *weight_between.entry(key).or_default() += weight;
    }

    let membership = louvain_partition(nodes.len(), &edges, resolution);

    // Group members per community
    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for (node, &community) in membership.iter().enumerate() {
        groups.entry(community).or_default().push(node);
    }

    // Stable cluster ids: largest first, ties by lowest member note id
    let mut ordered: Vec<Vec<usize>> = groups.into_values().collect();
    for members in &mut ordered {
        members.sort();
    }
    ordered.sort_by(|x, y| {
        y.len()
            .cmp(&x.len())
            .then_with(|| nodes[x[0]].id.cmp(&nodes[y[0]].id))
    });

    let now = Utc::now();
    let mut clusters = Vec::with_capacity(ordered.len());
    let mut assignments = Vec::with_capacity(nodes.len());

    for (position, members) in ordered.iter().enumerate() {
        let cluster_id = (position + 1) as i64;
        for &member in members {
            assignments.push((nodes[member].id.clone(), cluster_id));
        }

        let (title, summary) = if members.len() >= 2 {
            label_cluster(storage, llm, cluster_id, &nodes, members, &weight_between).await
        } else {
            (None, None)
        };

        clusters.push(ClusterRecord {
            id: cluster_id,
            title,
            summary,
            size: members.len() as i64,
            created_at: now,
            updated_at: now,
        });
    }

    storage.replace_clusters(&clusters, &assignments)?;

    let outcome = ClusterOutcome {
        clusters_created: clusters.len(),
        total_nodes: nodes.len(),
    };
    tracing::info!(
        clusters = outcome.clusters_created,
        nodes = outcome.total_nodes,
        resolution,
        "Community detection complete"
    );
    Ok(outcome)
}

// ============================================================================
// LABELING
// ============================================================================

#[derive(serde::Deserialize)]
struct LabelResponse {
    title: String,
    summary: String,
}

/// Label one community. On any LLM or parse failure, falls back to a
/// deterministic title and a summary built from the three most central
/// member titles.
async fn label_cluster(
    storage: &Storage,
    llm: &LlmClient,
    cluster_id: i64,
    nodes: &[crate::storage::GraphNode],
    members: &[usize],
    weight_between: &HashMap<(usize, usize), f64>,
) -> (Option<String>, Option<String>) {
    // Rank members by weighted degree inside the community
    let mut central: Vec<(usize, f64)> = members
        .iter()
        .map(|&m| {
            let degree: f64 = members
                .iter()
                .filter(|&&o| o != m)
                .map(|&o| {
                    let key = if m < o { (m, o) } else { (o, m) };
                    weight_between.get(&key).copied().unwrap_or(0.0)
                })
                .sum();
            (m, degree)
        })
        .collect();
    central.sort_by(|x, y| {
        y.1.partial_cmp(&x.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| nodes[x.0].id.cmp(&nodes[y.0].id))
    });

    let sampled: Vec<String> = central
        .iter()
        .take(LABEL_SAMPLE)
        .map(|&(m, _)| {
            let node = &nodes[m];
            let preview = body_preview(&node.path);
            if preview.is_empty() {
                format!("- {}", node.title)
            } else {
                format!("- {}: {}", node.title, preview)
            }
        })
        .collect();

    let prompt = format!(
        r#"These personal notes were grouped by graph community detection — no categories were predefined.

Notes in this cluster:
{}

Generate:
1. A title of 3-5 words that distinguishes this cluster from any other. No generic labels.
2. A summary of 1-2 sentences describing what these notes collectively cover.

Respond in this exact JSON format:
{{"title": "...", "summary": "..."}}"#,
        sampled.join("\n")
    );

    let fallback = || {
        let top_titles: Vec<&str> = central
            .iter()
            .take(3)
            .map(|&(m, _)| nodes[m].title.as_str())
            .collect();
        (
            Some(format!("Cluster #{}", cluster_id)),
            Some(top_titles.join("; ")),
        )
    };

    let mut audit = LlmOperationRecord {
        id: 0,
        note_id: None,
        kind: "cluster_title".to_string(),
        prompt_text: prompt.clone(),
        raw_response: None,
        parsed_output_json: None,
        tokens_in: None,
        tokens_out: None,
        duration_ms: 0,
        cost_usd: None,
        created_at: Utc::now(),
    };

    let label = match llm
        .chat("You name clusters of personal notes. Respond only with valid JSON.", &prompt, true)
        .await
    {
        Ok(outcome) => {
            audit.raw_response = Some(outcome.content.clone());
            audit.tokens_in = outcome.tokens_in;
            audit.tokens_out = outcome.tokens_out;
            audit.duration_ms = outcome.duration_ms;
            extract_json_object(&outcome.content)
                .and_then(|json| serde_json::from_str::<LabelResponse>(&json).ok())
        }
        Err(e) => {
            tracing::warn!(cluster_id, error = %e, "Cluster labeling failed, using fallback");
            None
        }
    };

    let result = match label {
        Some(label) if !label.title.trim().is_empty() => {
            audit.parsed_output_json = serde_json::to_string(&serde_json::json!({
                "title": label.title,
                "summary": label.summary,
            }))
            .ok();
            (
                Some(label.title.trim().to_string()),
                Some(label.summary.trim().to_string()),
            )
        }
        _ => fallback(),
    };

    if let Err(e) = storage.record_llm_operation(&audit) {
        tracing::warn!(error = %e, "Failed to record cluster labeling audit row");
    }

    result
}

/// First lines of the note body, best effort; metadata is in the database
/// but content lives on disk.
fn body_preview(path: &str) -> String {
    std::fs::read_to_string(path)
        .map(|body| {
            body.lines()
                .filter(|l| !l.trim().is_empty())
                .take(LABEL_BODY_LINES)
                .collect::<Vec<_>>()
                .join(" ")
                .chars()
                .take(160)
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// TESTS
// ============================================================================
