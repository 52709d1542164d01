//! Note - The fundamental content unit
//!
//! A note is a flat markdown file plus a database row. The file is
//! authoritative for the body; the database is authoritative for every piece
//! of metadata. Files never carry YAML front-matter — an earlier design that
//! stored metadata in front-matter caused extraction echo on re-ingest.

mod meta;

pub use meta::{
    EpisodicMetadata, ProspectiveItem, ProspectiveMetadata, TimeKind, TimeReference,
};

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// NOTE RECORD
// ============================================================================

/// A captured note's identity and filesystem location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    /// Stable textual id: `<RFC3339 timestamp>_<4 hex>`
    pub id: String,
    /// Short human-readable title (from extraction or first-line fallback)
    pub title: String,
    /// Absolute path of the markdown file holding the body
    pub path: PathBuf,
    /// Creation instant
    pub created: DateTime<Utc>,
    /// Last metadata update
    pub updated: DateTime<Utc>,
}

/// Generate a note id for the given instant: RFC3339 (second precision, Z)
/// plus a 4-hex-digit suffix to disambiguate same-second captures.
pub fn generate_note_id(now: DateTime<Utc>) -> String {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    format!(
        "{}_{:02x}{:02x}",
        now.to_rfc3339_opts(SecondsFormat::Secs, true),
        bytes[0],
        bytes[1]
    )
}

// ============================================================================
// FILE NAMING
// ============================================================================

/// Slugify a title for use in a markdown filename.
///
/// Deterministic: the same title always produces the same slug, so
/// re-ingesting an identical body lands on the same name.
pub fn slugify(title: &str) -> String {
    let slug: String = title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' || c == '-' {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase();

    if slug.is_empty() {
        "note".to_string()
    } else if slug.len() > 50 {
        // Truncate on a char boundary
        let mut end = 50;
        while !slug.is_char_boundary(end) {
            end -= 1;
        }
        slug[..end].trim_end_matches('-').to_string()
    } else {
        slug
    }
}

/// Filename for a note: `YYYYMMDD_HHMMSS_<slug>.md`
pub fn note_filename(created: DateTime<Utc>, title: &str) -> String {
    format!("{}_{}.md", created.format("%Y%m%d_%H%M%S"), slugify(title))
}

// ============================================================================
// ATOMIC FILE WRITE
// ============================================================================

/// Write a note body atomically: write to a `.tmp` sibling, then rename.
/// A crash mid-write never leaves a partial markdown file visible.
pub fn write_note_file(path: &Path, body: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("md.tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
