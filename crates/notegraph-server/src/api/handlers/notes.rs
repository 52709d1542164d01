//! Note capture and per-note endpoints

use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use notegraph_core::{capture_note as run_capture, index_note, TagSource};

use super::super::{ApiError, AppState};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureRequest {
    pub text: String,
}

/// POST /capture_note
///
/// Responds as soon as the write transaction commits; embedding and edge
/// construction are scheduled on the runtime and are fire-and-forget from
/// the client's perspective.
pub async fn capture_note(
    State(state): State<AppState>,
    Json(request): Json<CaptureRequest>,
) -> Result<Json<Value>, ApiError> {
    let captured = run_capture(&state.storage, &state.llm, &state.config, &request.text).await?;

    let note_id = captured.note_id.clone();
    let background = state.clone();
    tokio::spawn(async move {
        index_note(
            &background.storage,
            &background.embedder,
            &background.config,
            &background.locks,
            &note_id,
        )
        .await;
    });

    Ok(Json(json!({
        "note_id": captured.note_id,
        "title": captured.title,
        "episodic": captured.episodic,
        "path": captured.path,
    })))
}

/// GET /notes/{id}
pub async fn get_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let node = state
        .storage
        .get_node(&id)?
        .ok_or_else(|| ApiError::NotFound(format!("note {}", id)))?;
    Ok(Json(serde_json::to_value(node).map_err(|e| ApiError::Internal(e.to_string()))?))
}

/// DELETE /notes/{id}
///
/// Removes the note row (metadata, embedding, edges, tag assignments go via
/// cascade) and then the markdown file, best effort.
pub async fn delete_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let path = state
        .storage
        .delete_note(&id)?
        .ok_or_else(|| ApiError::NotFound(format!("note {}", id)))?;
    if let Err(e) = std::fs::remove_file(&path) {
        tracing::warn!(note_id = %id, error = %e, "Could not remove note file");
    }
    Ok(Json(json!({ "deleted": true, "note_id": id })))
}

/// GET /notes/{id}/tags
pub async fn list_note_tags(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.storage.get_node(&id)?.is_none() {
        return Err(ApiError::NotFound(format!("note {}", id)));
    }
    let tags = state.storage.tags_for_note(&id)?;
    Ok(Json(json!({ "note_id": id, "tags": tags })))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddTagsRequest {
    pub names: Vec<String>,
}

/// POST /notes/{id}/tags
pub async fn add_note_tags(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AddTagsRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.names.is_empty() {
        return Err(ApiError::BadRequest("names must not be empty".to_string()));
    }
    state
        .storage
        .add_tags_to_note(&id, &request.names, TagSource::User)?;
    let tags = state.storage.tags_for_note(&id)?;
    Ok(Json(json!({ "note_id": id, "tags": tags })))
}

/// DELETE /notes/{id}/tags/{tag_id}
pub async fn remove_note_tag(
    State(state): State<AppState>,
    Path((id, tag_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let removed = state.storage.remove_tag_from_note(&id, &tag_id)?;
    if !removed {
        return Err(ApiError::NotFound(format!(
            "note {} has no tag {}",
            id, tag_id
        )));
    }
    Ok(Json(json!({ "removed": true })))
}

#[derive(Debug, Deserialize)]
pub struct AuditParams {
    pub limit: Option<usize>,
}

/// GET /llm/operations?limit=
pub async fn list_llm_operations(
    State(state): State<AppState>,
    Query(params): Query<AuditParams>,
) -> Result<Json<Value>, ApiError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let operations = state.storage.list_llm_operations(limit)?;
    Ok(Json(json!({
        "count": operations.len(),
        "operations": operations,
    })))
}
