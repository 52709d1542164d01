//! Hybrid search endpoint

use axum::extract::State;
use axum::response::Json;
use serde::Deserialize;
use serde_json::Value;

use notegraph_core::SearchOptions;

use super::super::{ApiError, AppState};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: Option<usize>,
    pub expand_graph: Option<bool>,
    pub hops: Option<u32>,
}

impl SearchRequest {
    pub fn options(&self) -> SearchOptions {
        let defaults = SearchOptions::default();
        SearchOptions {
            top_k: self.top_k.unwrap_or(defaults.top_k),
            expand_graph: self.expand_graph.unwrap_or(defaults.expand_graph),
            hops: self.hops,
        }
    }
}

/// POST /search
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }
    let response = state
        .retriever
        .search(
            &state.storage,
            &state.embedder,
            &state.config,
            &request.query,
            &request.options(),
        )
        .await?;
    Ok(Json(serde_json::to_value(response).map_err(|e| ApiError::Internal(e.to_string()))?))
}
