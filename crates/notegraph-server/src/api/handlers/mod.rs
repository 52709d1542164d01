//! Endpoint handlers

pub mod graph;
pub mod notes;
pub mod search;
pub mod synthesize;
pub mod tags;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use super::{ApiError, AppState};

/// Health check
pub async fn health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let stats = state.storage.graph_stats()?;
    Ok(Json(json!({
        "status": "ok",
        "notes": stats.total_notes,
        "edges": stats.total_edges,
        "version": env!("CARGO_PKG_VERSION"),
    })))
}
