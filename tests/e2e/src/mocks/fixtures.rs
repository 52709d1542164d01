//! Canned LLM extraction payloads
//!
//! The mock chat endpoint answers an extraction prompt with the first
//! fixture whose needle appears in the prompt text. Unmatched prompts fall
//! back to an empty extraction, which exercises the degradation paths.

use serde_json::{json, Value};

/// One canned response, selected by substring match against the prompt
#[derive(Debug, Clone)]
pub struct Fixture {
    pub needle: &'static str,
    pub response: Value,
}

/// Fixtures covering the standard journey notes
pub fn default_fixtures() -> Vec<Fixture> {
    vec![
        // Basic capture with person, concept, and location
        Fixture {
            needle: "Café Awesome",
            response: json!({
                "who": ["Sarah"],
                "what": ["FAISS"],
                "where": ["Café Awesome"],
                "title": "Meeting with Sarah about FAISS"
            }),
        },
        // Second note sharing both entities, for entity_link checks
        Fixture {
            needle: "benchmark results",
            response: json!({
                "who": ["Sarah"],
                "what": ["FAISS"],
                "where": [],
                "title": "FAISS benchmark results from Sarah"
            }),
        },
        Fixture {
            needle: "vector search engine",
            response: json!({
                "who": [],
                "what": ["vector search", "HNSW"],
                "where": [],
                "title": "Vector search engine notes"
            }),
        },
        Fixture {
            needle: "memory consolidation",
            response: json!({
                "who": [],
                "what": ["memory consolidation", "sleep"],
                "where": [],
                "title": "Memory consolidation during sleep"
            }),
        },
        Fixture {
            needle: "gardening",
            response: json!({
                "who": [],
                "what": ["gardening", "tomatoes"],
                "where": ["backyard"],
                "title": "Backyard gardening plans"
            }),
        },
    ]
}
