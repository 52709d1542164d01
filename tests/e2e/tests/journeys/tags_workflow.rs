//! Hierarchical tag journeys over the HTTP surface

use axum::http::StatusCode;
use serde_json::json;

use notegraph_e2e_tests::harness::TestServer;

#[tokio::test]
async fn hashtag_hierarchy_is_created_on_capture() {
    let server = TestServer::spawn().await;

    let (status, body) = server
        .post_json(
            "/capture_note",
            json!({ "text": "Status update #project/alpha and #project/beta" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["episodic"]["tags"],
        json!(["project/alpha", "project/beta"])
    );

    let (_, tags) = server.get_json("/tags").await;
    let tags = tags["tags"].as_array().unwrap();
    assert_eq!(tags.len(), 3);

    let find = |name: &str| {
        tags.iter()
            .find(|t| t["name"] == name)
            .unwrap_or_else(|| panic!("missing tag {}", name))
    };
    let project = find("project");
    let alpha = find("project/alpha");
    let beta = find("project/beta");

    assert_eq!(project["level"], 0);
    assert_eq!(alpha["level"], 1);
    assert_eq!(alpha["parent_id"], project["id"]);
    assert_eq!(beta["parent_id"], project["id"]);

    // One note tagged: each child counts once, and the shared parent counts
    // the note once — not twice
    assert_eq!(alpha["use_count"], 1);
    assert_eq!(beta["use_count"], 1);
    assert_eq!(project["use_count"], 1);
}

#[tokio::test]
async fn tag_search_ranks_exact_prefix_substring() {
    let server = TestServer::spawn().await;
    for name in ["rust", "rustlang", "trust"] {
        let (status, _) = server.post_json("/tags", json!({ "name": name })).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = server.get_json("/tags/search?q=rust").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["tags"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["rust", "rustlang", "trust"]);

    let (status, _) = server.get_json("/tags/search").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn descendant_closure_collects_subtree_notes() {
    let server = TestServer::spawn().await;
    let parent_note = server.capture_indexed("Roadmap overview #project").await;
    let child_note = server.capture_indexed("Alpha kickoff #project/alpha").await;

    let (_, tags) = server.get_json("/tags").await;
    let project_id = tags["tags"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["name"] == "project")
        .unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();

    // Ancestor attachment: the child-tagged note is on "project" directly
    let (_, direct) = server
        .get_json(&format!("/tags/{}/notes", project_id))
        .await;
    let notes = direct["notes"].as_array().unwrap();
    assert_eq!(notes.len(), 2);
    assert!(notes.contains(&parent_note["note_id"]));
    assert!(notes.contains(&child_note["note_id"]));

    let (_, subtree) = server
        .get_json(&format!("/tags/{}/notes?include_children=true", project_id))
        .await;
    assert_eq!(subtree["notes"], direct["notes"]);
}

#[tokio::test]
async fn manual_tagging_is_idempotent() {
    let server = TestServer::spawn().await;
    let note = server.capture_indexed("A note about nothing in particular").await;
    let note_id = note["note_id"].as_str().unwrap();

    let (status, body) = server
        .post_json(
            &format!("/notes/{}/tags", note_id),
            json!({ "names": ["reading", "reading", "#Reading"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let tags = body["tags"].as_array().unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0]["name"], "reading");
    assert_eq!(tags[0]["use_count"], 1);

    let tag_id = tags[0]["id"].as_str().unwrap();
    let (status, _) = server
        .delete(&format!("/notes/{}/tags/{}", note_id, tag_id))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, remaining) = server.get_json(&format!("/notes/{}/tags", note_id)).await;
    assert!(remaining["tags"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn rename_keeps_note_assignments() {
    let server = TestServer::spawn().await;
    let note = server.capture_indexed("Weekend plans #proj/alpha").await;
    let note_id = note["note_id"].as_str().unwrap();

    let (_, tags) = server.get_json("/tags").await;
    let proj_id = tags["tags"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["name"] == "proj")
        .unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, renamed) = server
        .put_json(&format!("/tags/{}", proj_id), json!({ "name": "projects" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(renamed["id"], json!(proj_id));
    assert_eq!(renamed["name"], "projects");

    // The note still carries the (re-prefixed) child tag and its parent
    let (_, note_tags) = server.get_json(&format!("/notes/{}/tags", note_id)).await;
    let names: Vec<&str> = note_tags["tags"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["projects", "projects/alpha"]);
}

#[tokio::test]
async fn merge_rewrites_assignments_into_target() {
    let server = TestServer::spawn().await;
    let a = server.capture_indexed("Model training run #ml").await;
    let b = server.capture_indexed("Agent experiments #ai").await;

    let (_, tags) = server.get_json("/tags").await;
    let id_of = |name: &str| {
        tags["tags"]
            .as_array()
            .unwrap()
            .iter()
            .find(|t| t["name"] == name)
            .unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string()
    };
    let ml = id_of("ml");
    let ai = id_of("ai");

    let (status, merged) = server
        .post_json(
            "/tags/merge",
            json!({ "source_ids": [ml, ai], "target_name": "machine-learning" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(merged["name"], "machine-learning");
    assert_eq!(merged["use_count"], 2);

    let target_id = merged["id"].as_str().unwrap();
    let (_, notes) = server.get_json(&format!("/tags/{}/notes", target_id)).await;
    let notes = notes["notes"].as_array().unwrap();
    assert!(notes.contains(&a["note_id"]));
    assert!(notes.contains(&b["note_id"]));

    // Sources are gone
    let (_, remaining) = server.get_json("/tags").await;
    let names: Vec<&str> = remaining["tags"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(!names.contains(&"ml"));
    assert!(!names.contains(&"ai"));
}

#[tokio::test]
async fn tag_stats_buckets_by_recency() {
    let server = TestServer::spawn().await;
    server.capture_indexed("Fresh note #current").await;
    server.post_json("/tags", json!({ "name": "never-used" })).await;

    let (status, body) = server.get_json("/tags/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["by_recency"]["active"], 1);
    assert_eq!(body["by_recency"]["dormant"], 1);
}

#[tokio::test]
async fn unknown_tag_id_is_404() {
    let server = TestServer::spawn().await;
    let (status, _) = server.get_json("/tags/no-such-id/children").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = server.delete("/tags/no-such-id").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
