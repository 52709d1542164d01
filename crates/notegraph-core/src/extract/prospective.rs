//! Prospective extraction
//!
//! Runs strictly after episodic extraction: the prompt lists the WHEN
//! references already parsed so the model can bind items to known instants.
//! A `timedata` the model invents (anything outside the episodic `when`
//! set) is nulled before persisting.
//!
//! Prospective data never creates graph edges. An earlier design derived
//! edges from it (chronological proximity, shared deadlines, event
//! triggers) and drowned a ~60-note corpus in ~1,200 edges; it is metadata
//! only, available to retrieval as a filter at most.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::llm::{extract_json_object, LlmClient};
use crate::note::{ProspectiveItem, ProspectiveMetadata, TimeReference};
use crate::storage::LlmOperationRecord;

use super::Extraction;

const SYSTEM_PROMPT: &str = "You extract future-oriented items from personal notes. \
Respond with strict JSON only, no prose.";

fn build_prompt(text: &str, when: &[TimeReference]) -> String {
    let when_list = if when.is_empty() {
        "(none)".to_string()
    } else {
        when.iter()
            .map(|t| match t.parsed {
                Some(instant) => format!("- \"{}\" => {}", t.original, instant.to_rfc3339()),
                None => format!("- \"{}\" => unresolved", t.original),
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"Extract future-oriented items from the note below: explicit actions or TODOs, questions the note is asking, and future plans.

Time references already extracted from this note:
{}

Output strict JSON:

{{
  "contains_prospective": true,
  "items": [
    {{"content": "<item_1>", "timedata": "<RFC3339 instant or null>"}}
  ]
}}

Rules:
- "content" is a short self-contained phrasing of the item.
- Set "timedata" ONLY when the item clearly corresponds to one of the listed time references; use that reference's RFC3339 value verbatim. Otherwise use null.
- If the note has no future-oriented items, output {{"contains_prospective": false, "items": []}}.
- Never copy a placeholder like <item_1> into your output.

Note:
---
{}
---"#,
        when_list, text
    )
}

#[derive(Deserialize)]
struct ProspectiveResponse {
    #[serde(default)]
    contains_prospective: bool,
    #[serde(default)]
    items: Vec<ItemResponse>,
}

#[derive(Deserialize)]
struct ItemResponse {
    content: String,
    #[serde(default)]
    timedata: Option<String>,
}

/// Extract prospective metadata. Invalid or missing LLM output degrades to
/// `contains_prospective = false` with no items.
pub async fn extract_prospective(
    llm: &LlmClient,
    note_id: &str,
    text: &str,
    episodic_when: &[TimeReference],
) -> Extraction<ProspectiveMetadata> {
    let prompt = build_prompt(text, episodic_when);

    let mut audit = LlmOperationRecord {
        id: 0,
        note_id: Some(note_id.to_string()),
        kind: "prospective".to_string(),
        prompt_text: prompt.clone(),
        raw_response: None,
        parsed_output_json: None,
        tokens_in: None,
        tokens_out: None,
        duration_ms: 0,
        cost_usd: None,
        created_at: Utc::now(),
    };

    let parsed = match llm.chat(SYSTEM_PROMPT, &prompt, true).await {
        Ok(outcome) => {
            audit.raw_response = Some(outcome.content.clone());
            audit.tokens_in = outcome.tokens_in;
            audit.tokens_out = outcome.tokens_out;
            audit.duration_ms = outcome.duration_ms;
            parse_response(&outcome.content)
        }
        Err(e) => {
            tracing::warn!(note_id, error = %e, "Prospective LLM call failed, storing empty metadata");
            None
        }
    };

    let mut value = match parsed {
        Some(response) => {
            let items: Vec<ProspectiveItem> = response
                .items
                .into_iter()
                .filter(|item| !item.content.trim().is_empty())
                .filter(|item| {
                    let t = item.content.trim();
                    !(t.starts_with('<') && t.ends_with('>'))
                })
                .map(|item| ProspectiveItem {
                    content: item.content.trim().to_string(),
                    timedata: item
                        .timedata
                        .as_deref()
                        .and_then(parse_rfc3339),
                })
                .collect();
            ProspectiveMetadata {
                contains_prospective: response.contains_prospective && !items.is_empty(),
                items,
            }
        }
        None => ProspectiveMetadata::default(),
    };

    // Enforce the integrity invariant: timedata must equal a parsed episodic
    // WHEN instant or be null.
    value.verify_timedata(episodic_when);
    audit.parsed_output_json = serde_json::to_string(&value).ok();

    Extraction { value, audit }
}

fn parse_response(raw: &str) -> Option<ProspectiveResponse> {
    let json = extract_json_object(raw)?;
    match serde_json::from_str::<ProspectiveResponse>(&json) {
        Ok(response) => Some(response),
        Err(e) => {
            tracing::warn!(error = %e, "Prospective response violated schema, storing empty metadata");
            None
        }
    }
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ============================================================================
// TESTS
// ============================================================================
