//! Hashtag parsing
//!
//! Recognizes `#tag` and hierarchical `#parent/child` hashtags in a note
//! body. Two hierarchy levels is a UX convention, not enforced here.

use std::sync::OnceLock;

use regex::Regex;

static HASHTAG_RE: OnceLock<Regex> = OnceLock::new();

fn hashtag_re() -> &'static Regex {
    HASHTAG_RE.get_or_init(|| {
        Regex::new(r"#([a-zA-Z0-9_\-]+(?:/[a-zA-Z0-9_\-]+)*)").expect("valid hashtag regex")
    })
}

/// Extract hashtag names (without the `#`) from a note body.
/// Case-insensitive deduplication; first-appearance order preserved.
pub fn parse_hashtags(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    hashtag_re()
        .captures_iter(text)
        .map(|cap| cap[1].to_string())
        .filter(|name| seen.insert(name.to_lowercase()))
        .collect()
}
