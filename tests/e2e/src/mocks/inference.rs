//! Mock local inference server
//!
//! Serves OpenAI-compatible `/v1/chat/completions` and `/v1/embeddings` on
//! a loopback port. Chat answers come from substring-matched fixtures;
//! embeddings are deterministic bags of hashed words, so notes sharing
//! vocabulary land close in cosine space and repeated runs are identical.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::Router;
use serde_json::{json, Value};

use super::fixtures::Fixture;

/// Embedding dimension served by the mock
pub const MOCK_DIMENSIONS: usize = 32;

/// Text streamed back for synthesis requests, split into deltas
const SYNTHESIS_DELTAS: &[&str] = &[
    "Based on your notes, ",
    "memory consolidation happens during sleep, ",
    "when the day's traces are replayed and strengthened.",
];

#[derive(Clone)]
struct MockState {
    fixtures: Arc<Vec<Fixture>>,
}

/// Handle to a running mock inference server
pub struct MockInference {
    pub base_url: String,
    addr: SocketAddr,
}

impl MockInference {
    /// Bind on an ephemeral loopback port and serve in the background
    pub async fn spawn(fixtures: Vec<Fixture>) -> Self {
        let state = MockState {
            fixtures: Arc::new(fixtures),
        };
        let app = Router::new()
            .route("/v1/chat/completions", post(chat_completions))
            .route("/v1/embeddings", post(embeddings))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock inference server");
        let addr = listener.local_addr().expect("mock local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{}", addr),
            addr,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

async fn chat_completions(
    State(state): State<MockState>,
    Json(body): Json<Value>,
) -> Response {
    let prompt = body["messages"]
        .as_array()
        .map(|messages| {
            messages
                .iter()
                .filter_map(|m| m["content"].as_str())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    if body["stream"].as_bool().unwrap_or(false) {
        return stream_response();
    }

    let content = canned_content(&state.fixtures, &prompt);
    Json(json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }],
        "usage": { "prompt_tokens": 100, "completion_tokens": 25 }
    }))
    .into_response()
}

fn canned_content(fixtures: &[Fixture], prompt: &str) -> String {
    // Cluster labeling prompt
    if prompt.contains("community detection") {
        return json!({
            "title": "Vector Search Research",
            "summary": "Notes exploring vector search tooling and related experiments."
        })
        .to_string();
    }
    // Prospective prompt: one bound item when the note mentions a follow-up
    if prompt.contains("future-oriented items") {
        if prompt.contains("follow up") {
            return json!({
                "contains_prospective": true,
                "items": [{ "content": "Follow up with Sarah", "timedata": null }]
            })
            .to_string();
        }
        return json!({ "contains_prospective": false, "items": [] }).to_string();
    }
    // Episodic prompt: first fixture whose needle appears
    for fixture in fixtures {
        if prompt.contains(fixture.needle) {
            return fixture.response.to_string();
        }
    }
    json!({ "who": [], "what": [], "where": [], "title": "" }).to_string()
}

fn stream_response() -> Response {
    let mut body = String::new();
    for delta in SYNTHESIS_DELTAS {
        let chunk = json!({ "choices": [{ "delta": { "content": delta } }] });
        body.push_str(&format!("data: {}\n\n", chunk));
    }
    body.push_str("data: [DONE]\n\n");

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from(body))
        .expect("stream response")
}

async fn embeddings(Json(body): Json<Value>) -> Json<Value> {
    let text = body["input"][0].as_str().unwrap_or_default();
    Json(json!({
        "data": [{ "embedding": hashed_embedding(text) }]
    }))
}

/// Deterministic bag-of-words embedding: each word bumps one hashed
/// dimension, then the vector is L2-normalized. Shared vocabulary means
/// high cosine similarity.
pub fn hashed_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; MOCK_DIMENSIONS];
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut hasher = DefaultHasher::new();
        word.hash(&mut hasher);
        vector[(hasher.finish() as usize) % MOCK_DIMENSIONS] += 1.0;
    }
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}
