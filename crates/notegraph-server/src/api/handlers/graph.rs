//! Graph inspection, clustering, and repair endpoints

use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use notegraph_core::{detect_communities, rebuild_edges as run_rebuild, Relation};

use super::super::{ApiError, AppState};

/// GET /graph/nodes
pub async fn list_nodes(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let nodes = state.storage.list_nodes()?;
    Ok(Json(json!({
        "count": nodes.len(),
        "nodes": nodes,
    })))
}

#[derive(Debug, Deserialize)]
pub struct EdgeParams {
    pub relation: Option<String>,
    pub limit: Option<usize>,
}

/// GET /graph/edges?relation=&limit=
pub async fn list_edges(
    State(state): State<AppState>,
    Query(params): Query<EdgeParams>,
) -> Result<Json<Value>, ApiError> {
    let relation = match params.relation.as_deref() {
        None | Some("") => None,
        Some(name) => Some(Relation::parse_name(name).ok_or_else(|| {
            ApiError::BadRequest(format!("Unknown relation: {}", name))
        })?),
    };
    let limit = params.limit.unwrap_or(500).clamp(1, 5000);
    let edges = state.storage.list_edges(relation, limit)?;
    Ok(Json(json!({
        "count": edges.len(),
        "edges": edges,
    })))
}

/// GET /graph/stats
pub async fn stats(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let stats = state.storage.graph_stats()?;
    Ok(Json(json!({
        "nodes": { "total": stats.total_notes },
        "edges": {
            "total": stats.total_edges,
            "by_relation": stats.edges_by_relation,
        },
    })))
}

#[derive(Debug, Deserialize)]
pub struct ClusterParams {
    pub resolution: Option<f64>,
}

/// POST /graph/cluster?resolution=
///
/// A failed run leaves prior cluster state untouched (the rewrite is a
/// single transaction at the end).
pub async fn run_clustering(
    State(state): State<AppState>,
    Query(params): Query<ClusterParams>,
) -> Result<Json<Value>, ApiError> {
    let resolution = params.resolution.unwrap_or(state.config.cluster_resolution);
    if !(resolution.is_finite() && resolution > 0.0) {
        return Err(ApiError::BadRequest("resolution must be positive".to_string()));
    }
    let outcome = detect_communities(&state.storage, &state.llm, resolution).await?;
    Ok(Json(json!({
        "clusters_created": outcome.clusters_created,
        "total_nodes": outcome.total_nodes,
    })))
}

/// GET /graph/clusters
pub async fn list_clusters(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let clusters = state.storage.list_clusters()?;
    Ok(Json(json!({
        "count": clusters.len(),
        "clusters": clusters,
    })))
}

/// GET /graph/clusters/{id}
pub async fn get_cluster(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let cluster = state
        .storage
        .get_cluster(id)?
        .ok_or_else(|| ApiError::NotFound(format!("cluster {}", id)))?;
    let members = state.storage.cluster_members(id)?;
    Ok(Json(json!({
        "id": cluster.id,
        "title": cluster.title,
        "summary": cluster.summary,
        "size": cluster.size,
        "created_at": cluster.created_at,
        "updated_at": cluster.updated_at,
        "members": members,
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RebuildRequest {
    pub note_id: Option<String>,
}

/// POST /graph/rebuild_edges
///
/// Manual repair for abandoned background work: re-embeds where the vector
/// is missing and re-runs the edge builder.
pub async fn rebuild_edges(
    State(state): State<AppState>,
    Json(request): Json<RebuildRequest>,
) -> Result<Json<Value>, ApiError> {
    if let Some(note_id) = &request.note_id {
        if state.storage.get_node(note_id)?.is_none() {
            return Err(ApiError::NotFound(format!("note {}", note_id)));
        }
    }
    let processed = run_rebuild(
        &state.storage,
        &state.embedder,
        &state.config,
        &state.locks,
        request.note_id.as_deref(),
    )
    .await?;
    Ok(Json(json!({ "notes_processed": processed })))
}
