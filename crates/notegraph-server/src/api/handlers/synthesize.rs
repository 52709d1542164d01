//! Streaming synthesis endpoint
//!
//! Server-Sent-Events over the retrieval result: one `start`, one or more
//! `chunk` events with partial text, and a terminal `end` (full text plus
//! the notes consulted) or `error`. Chunks the client has seen are never
//! retracted; a disconnect drops the stream, cancelling the LLM request.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use serde_json::json;

use notegraph_core::{synthesize_stream, SynthesisEvent};

use super::super::{ApiError, AppState};
use super::search::SearchRequest;

/// POST /synthesize
pub async fn synthesize(
    State(state): State<AppState>,
    axum::Json(request): axum::Json<SearchRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }

    let retrieval = state
        .retriever
        .search(
            &state.storage,
            &state.embedder,
            &state.config,
            &request.query,
            &request.options(),
        )
        .await?;

    let events = synthesize_stream(
        state.llm.clone(),
        state.storage.clone(),
        request.query,
        retrieval,
    )
    .map(|event| {
        let sse_event = match event {
            SynthesisEvent::Start => Event::default().event("start").data("{}"),
            SynthesisEvent::Chunk { delta } => Event::default()
                .event("chunk")
                .data(json!({ "delta": delta }).to_string()),
            SynthesisEvent::End {
                text,
                notes_analyzed,
            } => Event::default().event("end").data(
                json!({ "text": text, "notes_analyzed": notes_analyzed }).to_string(),
            ),
            SynthesisEvent::Error { message } => Event::default()
                .event("error")
                .data(json!({ "message": message }).to_string()),
        };
        Ok(sse_event)
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
