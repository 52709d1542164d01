//! Community detection and streaming synthesis journeys

use axum::http::StatusCode;
use serde_json::json;

use notegraph_e2e_tests::harness::TestServer;

/// Seed two dense thematic groups plus one isolated note
async fn seed_corpus(server: &TestServer) {
    for text in [
        "Notes on a vector search engine and HNSW recall",
        "Sarah sent the FAISS benchmark results",
        "Meeting with Sarah at Café Awesome today at 2pm about FAISS",
        "Planting tomatoes for the gardening season",
        "More gardening: compost and tomatoes thriving",
        "Unrelated thought with no connections xyzzy",
    ] {
        server.capture_indexed(text).await;
    }
}

#[tokio::test]
async fn clustering_partitions_and_labels_the_corpus() {
    let server = TestServer::spawn().await;
    seed_corpus(&server).await;

    let (status, outcome) = server
        .post_json("/graph/cluster?resolution=1.0", json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["total_nodes"], 6);
    let clusters_created = outcome["clusters_created"].as_u64().unwrap();
    assert!(clusters_created >= 2, "outcome: {}", outcome);

    let (_, listing) = server.get_json("/graph/clusters").await;
    let clusters = listing["clusters"].as_array().unwrap();
    assert_eq!(clusters.len() as u64, clusters_created);

    // Member sets are a partition of all notes
    let mut all_members = Vec::new();
    for cluster in clusters {
        let id = cluster["id"].as_i64().unwrap();
        let (status, detail) = server.get_json(&format!("/graph/clusters/{}", id)).await;
        assert_eq!(status, StatusCode::OK);
        let members = detail["members"].as_array().unwrap();
        assert_eq!(members.len() as i64, cluster["size"].as_i64().unwrap());
        all_members.extend(members.iter().map(|m| m.as_str().unwrap().to_string()));

        // Multi-member clusters carry an LLM (or fallback) label
        if cluster["size"].as_i64().unwrap() >= 2 {
            assert!(cluster["title"].is_string(), "cluster: {}", cluster);
            assert!(cluster["summary"].is_string());
        }
    }
    all_members.sort();
    all_members.dedup();
    assert_eq!(all_members.len(), 6);

    // Every node now carries its cluster assignment
    let (_, nodes) = server.get_json("/graph/nodes").await;
    for node in nodes["nodes"].as_array().unwrap() {
        assert!(node["cluster_id"].is_i64(), "unassigned node: {}", node);
    }
}

#[tokio::test]
async fn reclustering_replaces_prior_state() {
    let server = TestServer::spawn().await;
    seed_corpus(&server).await;

    server.post_json("/graph/cluster", json!({})).await;
    let (_, first) = server.get_json("/graph/clusters").await;

    server.post_json("/graph/cluster", json!({})).await;
    let (_, second) = server.get_json("/graph/clusters").await;

    // Same corpus, same partition sizes; ids restart rather than accumulate
    assert_eq!(first["count"], second["count"]);
}

#[tokio::test]
async fn invalid_resolution_is_rejected() {
    let server = TestServer::spawn().await;
    let (status, _) = server
        .post_json("/graph/cluster?resolution=-1.0", json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn synthesis_streams_start_chunks_and_end() {
    let server = TestServer::spawn().await;
    server
        .capture_indexed("Reading about memory consolidation during sleep")
        .await;

    let (status, body) = server
        .post_text(
            "/synthesize",
            json!({ "query": "What did I learn about memory consolidation?" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let starts = body.matches("event: start").count();
    let chunks = body.matches("event: chunk").count();
    let ends = body.matches("event: end").count();
    let errors = body.matches("event: error").count();

    assert_eq!(starts, 1, "body: {}", body);
    assert!(chunks >= 1);
    assert_eq!(ends + errors, 1, "exactly one terminal event: {}", body);

    // The end event carries the concatenated text and the notes consulted
    let end_line = body
        .lines()
        .skip_while(|l| *l != "event: end")
        .nth(1)
        .expect("end data line");
    let end_data: serde_json::Value =
        serde_json::from_str(end_line.trim_start_matches("data: ")).unwrap();
    assert!(end_data["text"]
        .as_str()
        .unwrap()
        .contains("memory consolidation"));
    assert!(!end_data["notes_analyzed"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn synthesis_records_an_audit_row() {
    let server = TestServer::spawn().await;
    server
        .capture_indexed("Reading about memory consolidation during sleep")
        .await;
    server
        .post_text("/synthesize", json!({ "query": "memory consolidation?" }))
        .await;

    let (_, ops) = server.get_json("/llm/operations?limit=10").await;
    let kinds: Vec<&str> = ops["operations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["kind"].as_str().unwrap())
        .collect();
    assert!(kinds.contains(&"synthesis"), "kinds: {:?}", kinds);
    assert!(kinds.contains(&"episodic"));
    assert!(kinds.contains(&"prospective"));
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let server = TestServer::spawn().await;
    let (status, _) = server.post_json("/synthesize", json!({ "query": " " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = server.post_json("/search", json!({ "query": "" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
