//! Episodic and prospective metadata payloads
//!
//! Episodic metadata is the objective "what IS in the text": WHO / WHAT /
//! WHERE / WHEN plus title and user hashtags. Prospective metadata is the
//! future-oriented layer: actions, questions, plans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// TIME REFERENCES
// ============================================================================

/// Classification of a temporal expression found in a note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeKind {
    /// A calendar date or clock time ("October 25", "14:30")
    Absolute,
    /// Anchored to the capture date ("tomorrow", "next Friday")
    Relative,
    /// A span ("for 2 hours", "3 weeks")
    Duration,
    /// A repeating cue ("every Monday")
    Recurring,
}

impl TimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeKind::Absolute => "absolute",
            TimeKind::Relative => "relative",
            TimeKind::Duration => "duration",
            TimeKind::Recurring => "recurring",
        }
    }
}

/// One temporal expression: the verbatim span, its resolved instant when
/// resolvable, and its kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeReference {
    /// Verbatim matched text
    pub original: String,
    /// Resolved instant, or None when the expression cannot be anchored
    pub parsed: Option<DateTime<Utc>>,
    /// Expression classification
    pub kind: TimeKind,
}

// ============================================================================
// EPISODIC METADATA
// ============================================================================

/// Objective metadata extracted from a note body (1:1 with the note)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodicMetadata {
    /// Normalized person names, first-mention order
    pub who: Vec<String>,
    /// Concepts: technologies, topics, projects — no sub-typing
    pub what: Vec<String>,
    /// Locations: physical, virtual, contextual
    #[serde(rename = "where")]
    pub where_: Vec<String>,
    /// Temporal references found by the deterministic parser
    pub when: Vec<TimeReference>,
    /// Tags extracted verbatim from `#hashtag` syntax, first-appearance order
    pub tags: Vec<String>,
    /// Short human-readable title (≤ ~10 words)
    pub title: String,
}

impl EpisodicMetadata {
    /// All entity strings across who ∪ what ∪ where, in order
    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.who
            .iter()
            .chain(self.what.iter())
            .chain(self.where_.iter())
            .map(String::as_str)
    }
}

// ============================================================================
// PROSPECTIVE METADATA
// ============================================================================

/// One future-oriented item: an action, question, or plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProspectiveItem {
    /// The item text
    pub content: String,
    /// Bound timepoint; only ever non-null when it equals a parsed value
    /// from the same note's episodic `when` list
    pub timedata: Option<DateTime<Utc>>,
}

/// Future-oriented metadata (1:1 with the note).
///
/// Stored strictly as metadata, never as graph edges. An earlier design
/// generated three kinds of prospective edges (chronological proximity,
/// shared deadlines, event triggers); on a ~60-note corpus that produced
/// ~1,200 edges and an unreadable graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProspectiveMetadata {
    /// Whether any future-oriented item was found
    pub contains_prospective: bool,
    /// The items, in extraction order
    pub items: Vec<ProspectiveItem>,
}

impl ProspectiveMetadata {
    /// Null out any `timedata` not present in the episodic `when` set.
    /// Guards the integrity invariant against model hallucination.
    pub fn verify_timedata(&mut self, episodic_when: &[TimeReference]) {
        let known: Vec<DateTime<Utc>> =
            episodic_when.iter().filter_map(|t| t.parsed).collect();
        for item in &mut self.items {
            if let Some(ts) = item.timedata {
                if !known.contains(&ts) {
                    item.timedata = None;
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
