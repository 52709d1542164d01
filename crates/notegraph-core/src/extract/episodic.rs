//! Episodic extraction
//!
//! WHO / WHAT / WHERE / TITLE come from a single LLM call; WHEN comes from
//! the deterministic time parser; tags come from the hashtag grammar. The
//! LLM prompt uses abstract placeholders only — concrete example names were
//! found to leak into outputs as hallucinated entities.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::llm::{extract_json_object, LlmClient};
use crate::note::EpisodicMetadata;
use crate::storage::LlmOperationRecord;

use super::{
    dedup_case_insensitive, parse_hashtags, parse_time_references, strip_front_matter, Extraction,
};

/// Maximum title length returned to callers
const MAX_TITLE_LEN: usize = 80;

/// Fallback title truncation (first line of the note)
const FALLBACK_TITLE_LEN: usize = 60;

const SYSTEM_PROMPT: &str = "You extract structured metadata from personal notes. \
Respond with strict JSON only, no prose.";

fn build_prompt(text: &str) -> String {
    format!(
        r#"Extract metadata from the note below. Output strict JSON with exactly these keys:

{{
  "who": ["<person_1>", "<person_2>"],
  "what": ["<concept_1>", "<concept_2>"],
  "where": ["<location_1>"],
  "title": "<short title, at most 10 words>"
}}

Rules:
- "who": people mentioned by name.
- "what": concepts, technologies, topics, projects. Do not split into subtypes.
- "where": locations — physical, virtual, or contextual.
- The examples above are placeholders. NEVER copy a placeholder like <person_1> into your output.
- If a category has no entries, output an empty array [].
- Use the exact surface forms from the note; do not invent entities.

Note:
---
{}
---"#,
        text
    )
}

#[derive(Deserialize, Default)]
struct EpisodicResponse {
    #[serde(default)]
    who: Vec<String>,
    #[serde(default)]
    what: Vec<String>,
    #[serde(default, rename = "where")]
    where_: Vec<String>,
    #[serde(default)]
    title: String,
}

/// Extract episodic metadata. Never fails: an LLM or parse error degrades to
/// empty entity lists and a first-line title, so capture always succeeds.
pub async fn extract_episodic(
    llm: &LlmClient,
    note_id: &str,
    text: &str,
    current_date: DateTime<Utc>,
) -> Extraction<EpisodicMetadata> {
    let body = strip_front_matter(text);
    let when = parse_time_references(body, current_date);
    let tags = parse_hashtags(body);
    let prompt = build_prompt(body);

    let mut audit = LlmOperationRecord {
        id: 0,
        note_id: Some(note_id.to_string()),
        kind: "episodic".to_string(),
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
            tracing::warn!(note_id, error = %e, "Episodic LLM call failed, using empty extraction");
            None
        }
    };

    let response = match parsed {
        Some(response) => {
            audit.parsed_output_json = serde_json::to_string(&serde_json::json!({
                "who": response.who,
                "what": response.what,
                "where": response.where_,
                "title": response.title,
            }))
            .ok();
            response
        }
        None => EpisodicResponse::default(),
    };

    let title = clean_title(&response.title)
        .unwrap_or_else(|| fallback_title(body));

    let value = EpisodicMetadata {
        who: dedup_case_insensitive(drop_placeholders(response.who)),
        what: dedup_case_insensitive(drop_placeholders(response.what)),
        where_: dedup_case_insensitive(drop_placeholders(response.where_)),
        when,
        tags,
        title,
    };

    Extraction { value, audit }
}

fn parse_response(raw: &str) -> Option<EpisodicResponse> {
    let json = extract_json_object(raw)?;
    match serde_json::from_str::<EpisodicResponse>(&json) {
        Ok(response) => Some(response),
        Err(e) => {
            tracing::warn!(error = %e, "Episodic response violated schema, using empty extraction");
            None
        }
    }
}

/// Drop entries that look like echoed placeholders (`<person_1>` etc.)
fn drop_placeholders(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .filter(|v| {
            let t = v.trim();
            !(t.starts_with('<') && t.ends_with('>'))
        })
        .collect()
}

fn clean_title(title: &str) -> Option<String> {
    let t = title.trim();
    if t.is_empty() || (t.starts_with('<') && t.ends_with('>')) {
        return None;
    }
    Some(truncate_chars(t, MAX_TITLE_LEN))
}

/// Auto-generated title: first line of the note, truncated
pub(crate) fn fallback_title(body: &str) -> String {
    let first_line = body.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let title = truncate_chars(first_line.trim(), FALLBACK_TITLE_LEN);
    if title.is_empty() {
        "Untitled note".to_string()
    } else {
        title
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
