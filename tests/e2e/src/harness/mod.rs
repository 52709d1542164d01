//! In-process test server
//!
//! Builds the full application (temp notes dir, temp database, mock
//! inference endpoints) and drives the axum router with `oneshot` requests.

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::util::ServiceExt;

use notegraph_core::{Config, Storage};
use notegraph_server::{build_router, AppState};

use crate::mocks::{default_fixtures, Fixture, MockInference, MOCK_DIMENSIONS};

/// A fully wired in-process server over temp storage
pub struct TestServer {
    pub app: Router,
    pub state: AppState,
    pub mock: MockInference,
    _dir: TempDir,
}

impl TestServer {
    /// Spawn with the default extraction fixtures
    pub async fn spawn() -> Self {
        Self::spawn_with_fixtures(default_fixtures()).await
    }

    pub async fn spawn_with_fixtures(fixtures: Vec<Fixture>) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let mock = MockInference::spawn(fixtures).await;

        let notes_dir = dir.path().join("Notes");
        let config = Config {
            notes_dir: notes_dir.clone(),
            db_path: notes_dir.join(".index").join("notegraph.db"),
            llm_endpoint: mock.base_url.clone(),
            llm_model: "mock-llm".to_string(),
            embedding_endpoint: mock.base_url.clone(),
            embedding_model: "mock-embed".to_string(),
            embedding_dimensions: MOCK_DIMENSIONS,
            ..Config::default()
        };

        let storage = Storage::open(&config.db_path).expect("open storage");
        let state = AppState::new(storage, config);
        let app = build_router(state.clone());

        Self {
            app,
            state,
            mock,
            _dir: dir,
        }
    }

    // ========================================================================
    // REQUEST HELPERS
    // ========================================================================

    pub async fn post_json(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        self.send(request).await
    }

    pub async fn get_json(&self, path: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .uri(path)
            .body(Body::empty())
            .expect("request");
        self.send(request).await
    }

    pub async fn put_json(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("PUT")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        self.send(request).await
    }

    pub async fn delete(&self, path: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("DELETE")
            .uri(path)
            .body(Body::empty())
            .expect("request");
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    /// POST and return the raw body as text (for the SSE endpoint)
    pub async fn post_text(&self, path: &str, body: Value) -> (StatusCode, String) {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    // ========================================================================
    // BACKGROUND-WORK SYNCHRONIZATION
    // ========================================================================

    /// Wait until the background task has stored an embedding for the note.
    /// Panics after ~5s — background indexing is fire-and-forget, so tests
    /// must rendezvous on its observable effect.
    pub async fn wait_for_indexing(&self, note_id: &str) {
        for _ in 0..500 {
            if self
                .state
                .storage
                .get_embedding(note_id)
                .expect("storage read")
                .is_some()
            {
                // Edge building runs after the embedding store under the
                // same per-note lock; acquiring it briefly means the edge
                // pass has finished too.
                let _guard = self.state.locks.acquire(note_id).await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("note {} was never indexed", note_id);
    }

    /// Capture a note and wait for its background indexing to finish
    pub async fn capture_indexed(&self, text: &str) -> Value {
        let (status, body) = self
            .post_json("/capture_note", serde_json::json!({ "text": text }))
            .await;
        assert_eq!(status, StatusCode::OK, "capture failed: {}", body);
        let note_id = body["note_id"].as_str().expect("note_id").to_string();
        self.wait_for_indexing(&note_id).await;
        body
    }
}
