//! Tag store endpoints

use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use notegraph_core::TagSource;

use super::super::{ApiError, AppState};

/// GET /tags
pub async fn list_tags(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let tags = state.storage.list_tags()?;
    Ok(Json(json!({ "count": tags.len(), "tags": tags })))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub limit: Option<usize>,
}

/// GET /tags/search?q=&limit=
pub async fn search_tags(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, ApiError> {
    let query = params
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::BadRequest("q is required".to_string()))?;
    let limit = params.limit.unwrap_or(10).clamp(1, 100);
    let tags = state.storage.search_tags(query, limit)?;
    Ok(Json(json!({ "query": query, "tags": tags })))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTagRequest {
    pub name: String,
}

/// POST /tags
pub async fn create_tag(
    State(state): State<AppState>,
    Json(request): Json<CreateTagRequest>,
) -> Result<Json<Value>, ApiError> {
    let tag = state.storage.get_or_create_tag(&request.name, TagSource::User)?;
    Ok(Json(serde_json::to_value(tag).map_err(|e| ApiError::Internal(e.to_string()))?))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenameTagRequest {
    pub name: String,
}

/// PUT /tags/{id}
pub async fn rename_tag(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RenameTagRequest>,
) -> Result<Json<Value>, ApiError> {
    let tag = state.storage.rename_tag(&id, &request.name)?;
    Ok(Json(serde_json::to_value(tag).map_err(|e| ApiError::Internal(e.to_string()))?))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeTagsRequest {
    pub source_ids: Vec<String>,
    pub target_name: String,
}

/// POST /tags/merge
pub async fn merge_tags(
    State(state): State<AppState>,
    Json(request): Json<MergeTagsRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.source_ids.is_empty() {
        return Err(ApiError::BadRequest("source_ids must not be empty".to_string()));
    }
    let tag = state
        .storage
        .merge_tags(&request.source_ids, &request.target_name)?;
    Ok(Json(serde_json::to_value(tag).map_err(|e| ApiError::Internal(e.to_string()))?))
}

/// DELETE /tags/{id}
pub async fn delete_tag(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.storage.delete_tag(&id)? {
        return Err(ApiError::NotFound(format!("tag {}", id)));
    }
    Ok(Json(json!({ "deleted": true, "tag_id": id })))
}

/// GET /tags/{id}/children
pub async fn tag_children(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.storage.get_tag(&id)?.is_none() {
        return Err(ApiError::NotFound(format!("tag {}", id)));
    }
    let children = state.storage.tag_children(&id)?;
    Ok(Json(json!({ "tag_id": id, "children": children })))
}

#[derive(Debug, Deserialize)]
pub struct TagNotesParams {
    pub include_children: Option<bool>,
}

/// GET /tags/{id}/notes?include_children=
pub async fn tag_notes(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<TagNotesParams>,
) -> Result<Json<Value>, ApiError> {
    if state.storage.get_tag(&id)?.is_none() {
        return Err(ApiError::NotFound(format!("tag {}", id)));
    }
    let include = params.include_children.unwrap_or(false);
    let notes = state.storage.notes_by_tag(&id, include)?;
    Ok(Json(json!({
        "tag_id": id,
        "include_children": include,
        "notes": notes,
    })))
}

/// GET /tags/stats
pub async fn tag_stats(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let rows = state.storage.tag_usage_stats()?;
    let mut by_recency = std::collections::BTreeMap::<String, i64>::new();
    for (_, _, _, recency) in &rows {
        *by_recency.entry(recency.clone()).or_default() += 1;
    }
    let tags: Vec<Value> = rows
        .into_iter()
        .map(|(id, name, use_count, recency)| {
            json!({ "id": id, "name": name, "use_count": use_count, "recency": recency })
        })
        .collect();
    Ok(Json(json!({
        "count": tags.len(),
        "by_recency": by_recency,
        "tags": tags,
    })))
}
