//! Capture → background indexing → hybrid search journeys

use axum::http::StatusCode;
use serde_json::json;

use notegraph_e2e_tests::harness::TestServer;

#[tokio::test]
async fn capture_returns_extraction_and_writes_file() {
    let server = TestServer::spawn().await;

    let (status, body) = server
        .post_json(
            "/capture_note",
            json!({ "text": "Meeting with Sarah at Café Awesome today at 2pm about FAISS" }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["episodic"]["who"], json!(["Sarah"]));
    assert!(body["episodic"]["what"]
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v == "FAISS"));
    assert!(body["episodic"]["where"]
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v == "Café Awesome"));

    // The deterministic time parser resolved "today at 2pm"
    let whens = body["episodic"]["when"].as_array().unwrap();
    assert!(whens
        .iter()
        .any(|w| w["original"] == "2pm" && w["parsed"].as_str().unwrap().contains("T14:00:00")));

    let title = body["title"].as_str().unwrap();
    assert!(!title.is_empty() && title.len() <= 80);

    // The markdown file holds the body only — no front-matter
    let path = body["path"].as_str().unwrap();
    let on_disk = std::fs::read_to_string(path).unwrap();
    assert!(on_disk.starts_with("Meeting with Sarah"));
    assert!(!on_disk.starts_with("---"));
}

#[tokio::test]
async fn capture_rejects_empty_text() {
    let server = TestServer::spawn().await;
    let (status, _) = server.post_json("/capture_note", json!({ "text": "   " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn extraction_failure_still_persists_the_note() {
    // No fixture matches this text, so the mock returns an empty extraction;
    // the note must persist with a first-line fallback title.
    let server = TestServer::spawn().await;
    let (status, body) = server
        .post_json("/capture_note", json!({ "text": "Completely unmatched text xyzzy" }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Completely unmatched text xyzzy");
    let note_id = body["note_id"].as_str().unwrap();
    let (status, node) = server.get_json(&format!("/notes/{}", note_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(node["episodic"]["who"], json!([]));
}

#[tokio::test]
async fn shared_entities_produce_one_entity_link_edge() {
    let server = TestServer::spawn().await;

    let first = server
        .capture_indexed("Meeting with Sarah at Café Awesome today at 2pm about FAISS")
        .await;
    let second = server
        .capture_indexed("Sarah sent the FAISS benchmark results")
        .await;

    let (status, edges) = server.get_json("/graph/edges?relation=entity_link").await;
    assert_eq!(status, StatusCode::OK);
    let edges = edges["edges"].as_array().unwrap();
    assert_eq!(edges.len(), 1, "exactly one entity_link edge: {:?}", edges);

    let edge = &edges[0];
    assert_eq!(edge["weight"], 2.0);
    assert!(edge["a"].as_str().unwrap() < edge["b"].as_str().unwrap());

    let mut shared: Vec<String> = edge["metadata"]["shared_entities"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    shared.sort();
    assert_eq!(shared, vec!["faiss", "sarah"]);

    // Both endpoints are the captured notes
    let ids = [
        first["note_id"].as_str().unwrap(),
        second["note_id"].as_str().unwrap(),
    ];
    assert!(ids.contains(&edge["a"].as_str().unwrap()));
    assert!(ids.contains(&edge["b"].as_str().unwrap()));
}

#[tokio::test]
async fn search_scores_are_bounded_and_deterministic() {
    let server = TestServer::spawn().await;
    server
        .capture_indexed("Notes on a vector search engine and HNSW recall")
        .await;
    server
        .capture_indexed("Sarah sent the FAISS benchmark results")
        .await;
    server
        .capture_indexed("Planting tomatoes for the gardening season")
        .await;

    let request = json!({ "query": "vector search", "top_k": 10 });
    let (status, first) = server.post_json("/search", request.clone()).await;
    assert_eq!(status, StatusCode::OK);

    let primary = first["primary"].as_array().unwrap();
    assert!(!primary.is_empty());
    for result in primary {
        for key in ["fts_score", "vector_score", "score"] {
            let score = result[key].as_f64().unwrap();
            assert!((0.0..=1.0).contains(&score), "{} out of bounds: {}", key, score);
        }
    }
    // Descending by fused score
    for pair in primary.windows(2) {
        assert!(pair[0]["score"].as_f64() >= pair[1]["score"].as_f64());
    }
    assert!(first["execution_time_ms"].is_u64());

    // Identical call, unchanged corpus, identical ordering
    let (_, second) = server.post_json("/search", request).await;
    assert_eq!(first["primary"], second["primary"]);
    assert_eq!(first["expanded"], second["expanded"]);
}

#[tokio::test]
async fn graph_expansion_reaches_linked_notes() {
    let server = TestServer::spawn().await;
    server
        .capture_indexed("Meeting with Sarah at Café Awesome today at 2pm about FAISS")
        .await;
    server
        .capture_indexed("Sarah sent the FAISS benchmark results")
        .await;

    // "Café" only matches the first note; with top_k 1 the second can only
    // arrive via expansion
    let (status, body) = server
        .post_json("/search", json!({ "query": "Café Awesome", "top_k": 1, "hops": 1 }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let expanded = body["expanded"].as_array().unwrap();
    assert!(!expanded.is_empty(), "expected expanded results: {}", body);
    let entry = &expanded[0];
    assert_eq!(entry["hop_distance"], 1);
    assert_eq!(entry["relation"], "entity_link");
    assert!(entry["relevance"].as_f64().unwrap() <= 1.0);
    assert!(entry["parent_id"].is_string());

    // Expansion off means no expanded results
    let (_, without) = server
        .post_json(
            "/search",
            json!({ "query": "Café Awesome", "top_k": 1, "expand_graph": false }),
        )
        .await;
    assert!(without["expanded"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn deleted_note_disappears_from_graph_and_disk() {
    let server = TestServer::spawn().await;
    let first = server
        .capture_indexed("Meeting with Sarah at Café Awesome today at 2pm about FAISS")
        .await;
    server
        .capture_indexed("Sarah sent the FAISS benchmark results")
        .await;

    let note_id = first["note_id"].as_str().unwrap();
    let path = first["path"].as_str().unwrap().to_string();
    assert!(std::path::Path::new(&path).exists());

    let (status, _) = server.delete(&format!("/notes/{}", note_id)).await;
    assert_eq!(status, StatusCode::OK);

    assert!(!std::path::Path::new(&path).exists());
    let (status, _) = server.get_json(&format!("/notes/{}", note_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, edges) = server.get_json("/graph/edges").await;
    assert_eq!(edges["count"], 0);
}

#[tokio::test]
async fn rebuild_edges_for_one_note_is_idempotent() {
    let server = TestServer::spawn().await;
    let first = server
        .capture_indexed("Meeting with Sarah at Café Awesome today at 2pm about FAISS")
        .await;
    let note_id = first["note_id"].as_str().unwrap();

    server.capture_indexed("Sarah sent the FAISS benchmark results").await;
    let (_, before) = server.get_json("/graph/stats").await;
    assert!(before["edges"]["total"].as_i64().unwrap() > 0);

    let (status, body) = server
        .post_json("/graph/rebuild_edges", json!({ "note_id": note_id }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["notes_processed"], 1);

    // Idempotent: edge totals unchanged after a repair pass
    let (_, after) = server.get_json("/graph/stats").await;
    assert_eq!(before["edges"]["total"], after["edges"]["total"]);
}

#[tokio::test]
async fn full_rebuild_embeds_only_missing_notes() {
    use chrono::Utc;
    use notegraph_core::{EpisodicMetadata, Note, ProspectiveMetadata};

    let server = TestServer::spawn().await;
    let indexed = server
        .capture_indexed("Meeting with Sarah at Café Awesome today at 2pm about FAISS")
        .await;
    let indexed_id = indexed["note_id"].as_str().unwrap();

    // Mark the indexed note with a sentinel vector; a repair sweep must
    // keep it rather than re-embed
    let mut sentinel = vec![0.0f32; 32];
    sentinel[0] = 1.0;
    server
        .state
        .storage
        .store_embedding(indexed_id, &sentinel, "sentinel")
        .unwrap();

    // A note persisted without the background task: no embedding yet
    let now = Utc::now();
    let orphan = Note {
        id: "orphan-note".to_string(),
        title: "Sarah's FAISS follow-up".to_string(),
        path: server.state.config.notes_dir.join("orphan.md"),
        created: now,
        updated: now,
    };
    std::fs::create_dir_all(&server.state.config.notes_dir).unwrap();
    std::fs::write(&orphan.path, "Sarah sent the FAISS benchmark results").unwrap();
    let episodic = EpisodicMetadata {
        who: vec!["Sarah".to_string()],
        what: vec!["FAISS".to_string()],
        title: orphan.title.clone(),
        ..Default::default()
    };
    server
        .state
        .storage
        .persist_capture(
            &orphan,
            &episodic,
            &ProspectiveMetadata::default(),
            "Sarah sent the FAISS benchmark results",
        )
        .unwrap();
    assert!(server.state.storage.get_embedding("orphan-note").unwrap().is_none());

    let (status, body) = server
        .post_json("/graph/rebuild_edges", json!({ "note_id": null }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["notes_processed"], 2);

    // The missing vector was filled in; the existing one was left alone
    assert!(server.state.storage.get_embedding("orphan-note").unwrap().is_some());
    assert_eq!(
        server.state.storage.get_embedding(indexed_id).unwrap().unwrap(),
        sentinel
    );

    // Shared entities now connect the repaired note into the graph
    let (_, edges) = server.get_json("/graph/edges?relation=entity_link").await;
    assert_eq!(edges["count"], 1);
}

#[tokio::test]
async fn health_reports_ok() {
    let server = TestServer::spawn().await;
    let (status, body) = server.get_json("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
