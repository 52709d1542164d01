//! HTTP API
//!
//! Router construction and serving. All bodies are JSON, all datetimes are
//! RFC3339, all ids are opaque strings; `/synthesize` answers with an SSE
//! stream.

mod error;
pub mod handlers;
mod state;

pub use error::ApiError;
pub use state::AppState;

use std::net::SocketAddr;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Build the axum router with the full HTTP surface
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        // Write path
        .route("/capture_note", post(handlers::notes::capture_note))
        // Notes
        .route("/notes/{id}", get(handlers::notes::get_note))
        .route("/notes/{id}", delete(handlers::notes::delete_note))
        .route("/notes/{id}/tags", get(handlers::notes::list_note_tags))
        .route("/notes/{id}/tags", post(handlers::notes::add_note_tags))
        .route(
            "/notes/{id}/tags/{tag_id}",
            delete(handlers::notes::remove_note_tag),
        )
        // Graph
        .route("/graph/nodes", get(handlers::graph::list_nodes))
        .route("/graph/edges", get(handlers::graph::list_edges))
        .route("/graph/stats", get(handlers::graph::stats))
        .route("/graph/cluster", post(handlers::graph::run_clustering))
        .route("/graph/clusters", get(handlers::graph::list_clusters))
        .route("/graph/clusters/{id}", get(handlers::graph::get_cluster))
        .route(
            "/graph/rebuild_edges",
            post(handlers::graph::rebuild_edges),
        )
        // Tags
        .route("/tags", get(handlers::tags::list_tags))
        .route("/tags", post(handlers::tags::create_tag))
        .route("/tags/search", get(handlers::tags::search_tags))
        .route("/tags/stats", get(handlers::tags::tag_stats))
        .route("/tags/merge", post(handlers::tags::merge_tags))
        .route("/tags/{id}", put(handlers::tags::rename_tag))
        .route("/tags/{id}", delete(handlers::tags::delete_tag))
        .route("/tags/{id}/children", get(handlers::tags::tag_children))
        .route("/tags/{id}/notes", get(handlers::tags::tag_notes))
        // Retrieval + synthesis
        .route("/search", post(handlers::search::search))
        .route("/synthesize", post(handlers::synthesize::synthesize))
        // Audit + health
        .route("/llm/operations", get(handlers::notes::list_llm_operations))
        .route("/health", get(handlers::health))
        .layer(ServiceBuilder::new().concurrency_limit(64).layer(cors))
        .with_state(state)
}

/// Bind and serve until the process is terminated
pub async fn serve(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);
    axum::serve(listener, app).await
}
