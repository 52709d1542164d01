//! Synthesis
//!
//! Streams an LLM answer over a retrieval result. The context block carries
//! primary notes in full, expanded notes as short previews, and cluster
//! labels as section headers. The event contract: one `Start`, one or more
//! `Chunk`s, then exactly one terminal `End` or `Error`. Chunks already
//! sent are never retracted.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{Stream, StreamExt};
use serde::Serialize;

use crate::llm::LlmClient;
use crate::search::SearchResponse;
use crate::storage::{LlmOperationRecord, Storage};

/// Characters of body included per primary note
const MAX_BODY_CHARS: usize = 2000;

/// Events emitted by a synthesis stream
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SynthesisEvent {
    Start,
    Chunk { delta: String },
    End { text: String, notes_analyzed: Vec<String> },
    Error { message: String },
}

// ============================================================================
// CONTEXT ASSEMBLY
// ============================================================================

/// Assemble the bounded context block for a retrieval result. Returns the
/// block and the ids of every note it consulted.
pub fn build_context(storage: &Storage, retrieval: &SearchResponse) -> (String, Vec<String>) {
    let mut context = String::new();
    let mut notes = Vec::new();

    if !retrieval.clusters.is_empty() {
        context.push_str("## Topic clusters\n");
        for cluster in &retrieval.clusters {
            let title = cluster.title.as_deref().unwrap_or("(unlabeled)");
            context.push_str(&format!("### {}\n", title));
            if let Some(summary) = &cluster.summary {
                context.push_str(summary);
                context.push('\n');
            }
        }
        context.push('\n');
    }

    context.push_str("## Notes\n");
    for result in &retrieval.primary {
        notes.push(result.id.clone());
        context.push_str(&format!(
            "### {} ({})\n",
            result.title,
            result.created.date_naive()
        ));
        match read_body(storage, &result.id) {
            Some(body) => {
                let truncated: String = body.chars().take(MAX_BODY_CHARS).collect();
                context.push_str(truncated.trim());
            }
            None => {
                if let Some(snippet) = &result.snippet {
                    context.push_str(snippet);
                }
            }
        }
        context.push_str("\n\n");
    }

    if !retrieval.expanded.is_empty() {
        context.push_str("## Related notes (via graph links)\n");
        for result in &retrieval.expanded {
            notes.push(result.id.clone());
            context.push_str(&format!(
                "- {} (linked by {} to {})\n",
                result.title,
                result.relation.as_str(),
                result.parent_id
            ));
        }
    }

    (context, notes)
}

fn read_body(storage: &Storage, note_id: &str) -> Option<String> {
    let node = storage.get_node(note_id).ok()??;
    std::fs::read_to_string(&node.path).ok()
}

fn build_prompt(query: &str, context: &str) -> String {
    format!(
        r#"Answer the question using only the notes below. Cite which notes informed the answer by title. If the notes do not contain the answer, say so.

Question: {}

{}"#,
        query, context
    )
}

const SYSTEM_PROMPT: &str = "You synthesize answers from a user's personal notes. \
Be concise and grounded; never invent notes that are not in the context.";

// ============================================================================
// STREAMING
// ============================================================================

type DeltaStream = Pin<Box<dyn Stream<Item = crate::llm::Result<String>> + Send>>;

enum StreamState {
    Start,
    Connect,
    Streaming(DeltaStream),
    Done,
}

struct StreamCtx {
    llm: LlmClient,
    storage: Arc<Storage>,
    prompt: String,
    notes: Vec<String>,
    accumulated: String,
    started: Instant,
    state: StreamState,
}

impl StreamCtx {
    /// Write the synthesis audit row once the stream reaches a terminal
    /// state. Failures here only warn; the client already has its answer.
    fn record_audit(&self, error: Option<&str>) {
        let raw = if let Some(error) = error {
            if self.accumulated.is_empty() {
                format!("<error: {}>", error)
            } else {
                format!("{}\n<error: {}>", self.accumulated, error)
            }
        } else {
            self.accumulated.clone()
        };

        let record = LlmOperationRecord {
            id: 0,
            note_id: None,
            kind: "synthesis".to_string(),
            prompt_text: self.prompt.clone(),
            raw_response: Some(raw),
            parsed_output_json: None,
            tokens_in: None,
            tokens_out: None,
            duration_ms: self.started.elapsed().as_millis() as i64,
            cost_usd: None,
            created_at: Utc::now(),
        };
        if let Err(e) = self.storage.record_llm_operation(&record) {
            tracing::warn!(error = %e, "Failed to record synthesis audit row");
        }
    }
}

/// Stream a synthesized answer for an already-executed retrieval.
///
/// The returned stream always yields `Start` first and exactly one terminal
/// event. A failure mid-stream surfaces as `Error`; earlier chunks stand.
/// Dropping the stream (client disconnect) drops the underlying request,
/// cancelling generation. The complete call lands in the LLM audit trail
/// when a terminal event is produced.
pub fn synthesize_stream(
    llm: LlmClient,
    storage: Arc<Storage>,
    query: String,
    retrieval: SearchResponse,
) -> impl Stream<Item = SynthesisEvent> + Send {
    let (context, notes_analyzed) = build_context(&storage, &retrieval);
    let prompt = build_prompt(&query, &context);

    let ctx = StreamCtx {
        llm,
        storage,
        prompt,
        notes: notes_analyzed,
        accumulated: String::new(),
        started: Instant::now(),
        state: StreamState::Start,
    };

    futures::stream::unfold(ctx, |mut ctx| async move {
        loop {
            match std::mem::replace(&mut ctx.state, StreamState::Done) {
                StreamState::Start => {
                    ctx.state = StreamState::Connect;
                    return Some((SynthesisEvent::Start, ctx));
                }
                StreamState::Connect => {
                    match ctx.llm.chat_stream(SYSTEM_PROMPT, &ctx.prompt).await {
                        Ok(stream) => {
                            ctx.state = StreamState::Streaming(Box::pin(stream));
                        }
                        Err(e) => {
                            ctx.record_audit(Some(&e.to_string()));
                            return Some((
                                SynthesisEvent::Error { message: e.to_string() },
                                ctx,
                            ));
                        }
                    }
                }
                StreamState::Streaming(mut stream) => match stream.next().await {
                    Some(Ok(delta)) => {
                        ctx.accumulated.push_str(&delta);
                        ctx.state = StreamState::Streaming(stream);
                        return Some((SynthesisEvent::Chunk { delta }, ctx));
                    }
                    Some(Err(e)) => {
                        ctx.record_audit(Some(&e.to_string()));
                        return Some((SynthesisEvent::Error { message: e.to_string() }, ctx));
                    }
                    None => {
                        ctx.record_audit(None);
                        let event = SynthesisEvent::End {
                            text: ctx.accumulated.clone(),
                            notes_analyzed: ctx.notes.clone(),
                        };
                        return Some((event, ctx));
                    }
                },
                StreamState::Done => return None,
            }
        }
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::{EpisodicMetadata, Note, ProspectiveMetadata};
    use crate::search::{ClusterContext, ExpandedResult, PrimaryResult};
    use crate::storage::Relation;
    use chrono::{TimeZone, Utc};

    fn retrieval_fixture() -> SearchResponse {
        let created = Utc.with_ymd_and_hms(2025, 10, 20, 12, 0, 0).unwrap();
        SearchResponse {
            query: "memory consolidation".to_string(),
            primary: vec![PrimaryResult {
                id: "n1".to_string(),
                title: "Sleep and memory".to_string(),
                snippet: Some("consolidation during sleep".to_string()),
                fts_score: 1.0,
                vector_score: 0.8,
                score: 0.88,
                cluster_id: Some(1),
                created,
            }],
            expanded: vec![ExpandedResult {
                id: "n2".to_string(),
                title: "Hippocampus notes".to_string(),
                relation: Relation::EntityLink,
                hop_distance: 1,
                parent_id: "n1".to_string(),
                relevance: 0.4,
            }],
            clusters: vec![ClusterContext {
                id: 1,
                title: Some("Memory Research Notes".to_string()),
                summary: Some("Notes about how memory works.".to_string()),
                size: 4,
            }],
            total_results: 2,
            execution_time_ms: 3,
        }
    }

    #[test]
    fn test_build_context_sections() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(&dir.path().join("test.db")).unwrap();
        let body_path = dir.path().join("n1.md");
        std::fs::write(&body_path, "Sleep consolidates memory traces overnight.").unwrap();

        let created = Utc.with_ymd_and_hms(2025, 10, 20, 12, 0, 0).unwrap();
        let note = Note {
            id: "n1".to_string(),
            title: "Sleep and memory".to_string(),
            path: body_path,
            created,
            updated: created,
        };
        storage
            .persist_capture(
                &note,
                &EpisodicMetadata::default(),
                &ProspectiveMetadata::default(),
                "Sleep consolidates memory traces overnight.",
            )
            .unwrap();

        let retrieval = retrieval_fixture();
        let (context, notes) = build_context(&storage, &retrieval);

        assert!(context.contains("## Topic clusters"));
        assert!(context.contains("### Memory Research Notes"));
        assert!(context.contains("### Sleep and memory"));
        assert!(context.contains("consolidates memory traces"));
        assert!(context.contains("## Related notes"));
        assert!(context.contains("Hippocampus notes"));
        assert_eq!(notes, vec!["n1", "n2"]);
    }

    #[test]
    fn test_build_context_falls_back_to_snippet() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(&dir.path().join("test.db")).unwrap();
        // Note row exists but the file does not
        let created = Utc.with_ymd_and_hms(2025, 10, 20, 12, 0, 0).unwrap();
        let note = Note {
            id: "n1".to_string(),
            title: "Sleep and memory".to_string(),
            path: dir.path().join("missing.md"),
            created,
            updated: created,
        };
        storage
            .persist_capture(
                &note,
                &EpisodicMetadata::default(),
                &ProspectiveMetadata::default(),
                "body",
            )
            .unwrap();

        let (context, _) = build_context(&storage, &retrieval_fixture());
        assert!(context.contains("consolidation during sleep"));
    }

    #[test]
    fn test_event_serialization_shape() {
        let start = serde_json::to_value(SynthesisEvent::Start).unwrap();
        assert_eq!(start["event"], "start");

        let chunk = serde_json::to_value(SynthesisEvent::Chunk { delta: "hi".into() }).unwrap();
        assert_eq!(chunk["delta"], "hi");

        let end = serde_json::to_value(SynthesisEvent::End {
            text: "answer".into(),
            notes_analyzed: vec!["n1".into()],
        })
        .unwrap();
        assert_eq!(end["event"], "end");
        assert_eq!(end["notes_analyzed"][0], "n1");
    }
}
