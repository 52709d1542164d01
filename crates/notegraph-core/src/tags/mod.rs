//! Tag Store
//!
//! Hierarchical user tags: `#parent/child` syntax, normalized names, trigger
//! maintained usage counters, tiered fuzzy autocomplete. Tag ids are opaque
//! UUIDs so renames and merges never invalidate note assignments.
//!
//! Invariants:
//! - names are canonical lowercase, unique case-insensitively
//! - a tag named `x/y` has `parent_id` pointing at the tag named `x`
//! - `level` equals the number of `/` in the name
//! - `use_count` equals the number of note_tags rows (triggers)

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::storage::{Result, Storage, StorageError, TagRecord, TagSource};

// ============================================================================
// NAME NORMALIZATION
// ============================================================================

/// Normalize a tag name: strip a leading `#`, lowercase, collapse runs of
/// internal whitespace to a single space. `-` and `_` are preserved as
/// typed — "deep work" and "deep-work" stay distinct tags. Hashtags parsed
/// from note bodies can never contain whitespace; this only matters for
/// names arriving through the tag management API.
pub fn normalize_tag_name(name: &str) -> String {
    let stripped = name.trim().trim_start_matches('#');
    stripped
        .split('/')
        .map(|segment| segment.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("/")
        .to_lowercase()
}

/// Hierarchy level of a normalized name (number of `/`)
fn level_of(name: &str) -> i64 {
    name.matches('/').count() as i64
}

/// Parent portion of a hierarchical name, if any
fn parent_of(name: &str) -> Option<&str> {
    name.rsplit_once('/').map(|(parent, _)| parent)
}

// ============================================================================
// CONNECTION-LEVEL HELPERS
// ============================================================================
// These take a plain `&Connection` so the capture transaction can reuse them
// inside its own transaction.

/// Get-or-create a tag by (possibly hierarchical) name, recursively ensuring
/// every ancestor exists. Returns the tag id. Idempotent.
pub(crate) fn ensure_tag(
    conn: &Connection,
    name: &str,
    source: TagSource,
    now: DateTime<Utc>,
) -> Result<String> {
    let canonical = normalize_tag_name(name);
    if canonical.is_empty() || canonical.starts_with('/') || canonical.ends_with('/') {
        return Err(StorageError::InvalidInput(format!(
            "Invalid tag name: {:?}",
            name
        )));
    }

    if let Some(existing) = lookup_tag_id(conn, &canonical)? {
        return Ok(existing);
    }

    let parent_id = match parent_of(&canonical) {
        Some(parent) => Some(ensure_tag(conn, parent, source, now)?),
        None => None,
    };

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO tags (id, name, parent_id, level, use_count, created_at, source)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
        params![
            id,
            canonical,
            parent_id,
            level_of(&canonical),
            now.to_rfc3339(),
            source.as_str()
        ],
    )?;
    Ok(id)
}

/// Attach a tag to a note. Idempotent on `(note_id, tag_id)`; the usage
/// counter only moves when a row is actually inserted.
pub(crate) fn attach_tag(
    conn: &Connection,
    note_id: &str,
    tag_id: &str,
    source: TagSource,
    now: DateTime<Utc>,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO note_tags (note_id, tag_id, created_at, source)
         VALUES (?1, ?2, ?3, ?4)",
        params![note_id, tag_id, now.to_rfc3339(), source.as_str()],
    )?;
    Ok(inserted > 0)
}

/// Attach a tag and every ancestor to a note. Tagging `#project/alpha`
/// also tags `project`, so the parent's counter reflects notes anywhere in
/// its subtree while a note with two siblings still counts once.
pub(crate) fn attach_tag_with_ancestors(
    conn: &Connection,
    note_id: &str,
    tag_id: &str,
    source: TagSource,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut current = Some(tag_id.to_string());
    while let Some(id) = current {
        attach_tag(conn, note_id, &id, source, now)?;
        current = conn
            .query_row(
                "SELECT parent_id FROM tags WHERE id = ?1",
                params![id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
    }
    Ok(())
}

fn lookup_tag_id(conn: &Connection, canonical: &str) -> Result<Option<String>> {
    let id = conn
        .query_row(
            "SELECT id FROM tags WHERE name = ?1 COLLATE NOCASE",
            params![canonical],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

fn row_to_tag(row: &rusqlite::Row<'_>) -> rusqlite::Result<TagRecord> {
    Ok(TagRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        parent_id: row.get(2)?,
        level: row.get(3)?,
        use_count: row.get(4)?,
        created_at: row.get(5)?,
        last_used_at: row.get(6)?,
        source: row.get(7)?,
    })
}

const TAG_COLUMNS: &str = "id, name, parent_id, level, use_count, created_at, last_used_at, source";

/// Rewrite descendant names after a rename or merge: every tag whose name
/// starts with `old_prefix + "/"` gets the prefix swapped and its level
/// recomputed. parent_id links are untouched (UUIDs survive renames).
fn rewrite_descendants(conn: &Connection, old_prefix: &str, new_prefix: &str) -> Result<()> {
    let like = format!("{}/%", old_prefix.replace('%', "\\%").replace('_', "\\_"));
    let mut stmt =
        conn.prepare("SELECT id, name FROM tags WHERE name LIKE ?1 ESCAPE '\\'")?;
    let rows = stmt.query_map(params![like], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut renames = Vec::new();
    for row in rows {
        let (id, name) = row?;
        let suffix = &name[old_prefix.len()..];
        renames.push((id, format!("{}{}", new_prefix, suffix)));
    }
    for (id, new_name) in renames {
        conn.execute(
            "UPDATE tags SET name = ?1, level = ?2 WHERE id = ?3",
            params![new_name, level_of(&new_name), id],
        )?;
    }
    Ok(())
}

// ============================================================================
// TAG STORE (public surface on Storage)
// ============================================================================

impl Storage {
    /// Get-or-create a tag by name, creating missing ancestors
    pub fn get_or_create_tag(&self, name: &str, source: TagSource) -> Result<TagRecord> {
        let id = self.with_write_retry(|conn| {
            let tx = conn.transaction()?;
            let id = ensure_tag(&tx, name, source, Utc::now())?;
            tx.commit()?;
            Ok(id)
        })?;
        self.get_tag(&id)?
            .ok_or_else(|| StorageError::NotFound(id))
    }

    /// One tag by id
    pub fn get_tag(&self, id: &str) -> Result<Option<TagRecord>> {
        let reader = self.lock_reader()?;
        let tag = reader
            .query_row(
                &format!("SELECT {} FROM tags WHERE id = ?1", TAG_COLUMNS),
                params![id],
                row_to_tag,
            )
            .optional()?;
        Ok(tag)
    }

    /// One tag by canonical name (case-insensitive)
    pub fn find_tag_by_name(&self, name: &str) -> Result<Option<TagRecord>> {
        let canonical = normalize_tag_name(name);
        let reader = self.lock_reader()?;
        let tag = reader
            .query_row(
                &format!(
                    "SELECT {} FROM tags WHERE name = ?1 COLLATE NOCASE",
                    TAG_COLUMNS
                ),
                params![canonical],
                row_to_tag,
            )
            .optional()?;
        Ok(tag)
    }

    /// All tags, by name
    pub fn list_tags(&self) -> Result<Vec<TagRecord>> {
        let reader = self.lock_reader()?;
        let mut stmt =
            reader.prepare(&format!("SELECT {} FROM tags ORDER BY name", TAG_COLUMNS))?;
        let rows = stmt.query_map([], row_to_tag)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Attach a tag (by name) to a note. Creates the tag if needed.
    pub fn add_tag_to_note(
        &self,
        note_id: &str,
        name: &str,
        source: TagSource,
    ) -> Result<TagRecord> {
        if self.get_node(note_id)?.is_none() {
            return Err(StorageError::NotFound(format!("note {}", note_id)));
        }
        let id = self.with_write_retry(|conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();
            let id = ensure_tag(&tx, name, source, now)?;
            attach_tag_with_ancestors(&tx, note_id, &id, source, now)?;
            tx.commit()?;
            Ok(id)
        })?;
        self.get_tag(&id)?
            .ok_or_else(|| StorageError::NotFound(id))
    }

    /// Attach several tags to a note in one transaction
    pub fn add_tags_to_note(
        &self,
        note_id: &str,
        names: &[String],
        source: TagSource,
    ) -> Result<Vec<String>> {
        if self.get_node(note_id)?.is_none() {
            return Err(StorageError::NotFound(format!("note {}", note_id)));
        }
        self.with_write_retry(|conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();
            let mut ids = Vec::new();
            for name in names {
                let id = ensure_tag(&tx, name, source, now)?;
                attach_tag_with_ancestors(&tx, note_id, &id, source, now)?;
                ids.push(id);
            }
            tx.commit()?;
            Ok(ids)
        })
    }

    /// Detach a tag from a note. Returns whether a row was removed.
    pub fn remove_tag_from_note(&self, note_id: &str, tag_id: &str) -> Result<bool> {
        self.with_write_retry(|conn| {
            let removed = conn.execute(
                "DELETE FROM note_tags WHERE note_id = ?1 AND tag_id = ?2",
                params![note_id, tag_id],
            )?;
            Ok(removed > 0)
        })
    }

    /// Tags attached to one note, by name
    pub fn tags_for_note(&self, note_id: &str) -> Result<Vec<TagRecord>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(
            "SELECT t.id, t.name, t.parent_id, t.level, t.use_count,
                    t.created_at, t.last_used_at, t.source
             FROM tags t
             JOIN note_tags nt ON nt.tag_id = t.id
             WHERE nt.note_id = ?1
             ORDER BY t.name",
        )?;
        let rows = stmt.query_map(params![note_id], row_to_tag)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Fuzzy autocomplete. Ranking tiers: exact match, then prefix matches,
    /// then substring matches; within a tier, higher use_count first, ties
    /// broken by most recent use.
    pub fn search_tags(&self, query: &str, limit: usize) -> Result<Vec<TagRecord>> {
        let needle = normalize_tag_name(query);
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let like = format!(
            "%{}%",
            needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM tags WHERE name LIKE ?1 ESCAPE '\\'",
            TAG_COLUMNS
        ))?;
        let rows = stmt.query_map(params![like], row_to_tag)?;

        let mut candidates = Vec::new();
        for row in rows {
            candidates.push(row?);
        }

        let tier = |tag: &TagRecord| -> u8 {
            if tag.name == needle {
                0
            } else if tag.name.starts_with(&needle) {
                1
            } else {
                2
            }
        };
        candidates.sort_by(|x, y| {
            tier(x)
                .cmp(&tier(y))
                .then(y.use_count.cmp(&x.use_count))
                .then(y.last_used_at.cmp(&x.last_used_at))
                .then(x.name.cmp(&y.name))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    /// Direct children of a tag
    pub fn tag_children(&self, tag_id: &str) -> Result<Vec<TagRecord>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {} FROM tags WHERE parent_id = ?1 ORDER BY name",
            TAG_COLUMNS
        ))?;
        let rows = stmt.query_map(params![tag_id], row_to_tag)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Note ids carrying a tag; with `include_descendants`, the union over
    /// the tag's whole subtree (transitive closure on parent_id).
    pub fn notes_by_tag(&self, tag_id: &str, include_descendants: bool) -> Result<Vec<String>> {
        let reader = self.lock_reader()?;
        let sql = if include_descendants {
            "WITH RECURSIVE subtree(id) AS (
                 SELECT ?1
                 UNION ALL
                 SELECT t.id FROM tags t JOIN subtree s ON t.parent_id = s.id
             )
             SELECT DISTINCT nt.note_id FROM note_tags nt
             JOIN subtree s ON nt.tag_id = s.id
             ORDER BY nt.note_id"
        } else {
            "SELECT note_id FROM note_tags WHERE tag_id = ?1 ORDER BY note_id"
        };
        let mut stmt = reader.prepare(sql)?;
        let rows = stmt.query_map(params![tag_id], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Rename a tag, preserving its UUID so note assignments stay valid.
    /// Missing ancestors of the new name are created; descendants are
    /// re-prefixed so the hierarchy invariant holds.
    pub fn rename_tag(&self, tag_id: &str, new_name: &str) -> Result<TagRecord> {
        let canonical = normalize_tag_name(new_name);
        if canonical.is_empty() {
            return Err(StorageError::InvalidInput("Empty tag name".into()));
        }

        self.with_write_retry(|conn| {
            let tx = conn.transaction()?;

            let old_name: String = tx
                .query_row(
                    "SELECT name FROM tags WHERE id = ?1",
                    params![tag_id],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| StorageError::NotFound(format!("tag {}", tag_id)))?;

            if let Some(existing) = lookup_tag_id(&tx, &canonical)? {
                if existing != tag_id {
                    return Err(StorageError::InvalidInput(format!(
                        "Tag {:?} already exists; use merge",
                        canonical
                    )));
                }
            }

            let parent_id = match parent_of(&canonical) {
                Some(parent) => {
                    if parent == old_name || parent.starts_with(&format!("{}/", old_name)) {
                        return Err(StorageError::InvalidInput(
                            "Cannot move a tag under its own subtree".into(),
                        ));
                    }
                    Some(ensure_tag(&tx, parent, TagSource::User, Utc::now())?)
                }
                None => None,
            };

            tx.execute(
                "UPDATE tags SET name = ?1, parent_id = ?2, level = ?3 WHERE id = ?4",
                params![canonical, parent_id, level_of(&canonical), tag_id],
            )?;
            rewrite_descendants(&tx, &old_name, &canonical)?;

            tx.commit()?;
            Ok(())
        })?;

        self.get_tag(tag_id)?
            .ok_or_else(|| StorageError::NotFound(tag_id.to_string()))
    }

    /// Merge source tags into a target (created on demand). All note
    /// assignments are rewritten to the target, children of each source are
    /// re-parented under it, and the source tags are deleted. One
    /// transaction.
    pub fn merge_tags(&self, source_ids: &[String], target_name: &str) -> Result<TagRecord> {
        let target_id = self.with_write_retry(|conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();
            let target_id = ensure_tag(&tx, target_name, TagSource::User, now)?;
            let target: String = tx.query_row(
                "SELECT name FROM tags WHERE id = ?1",
                params![target_id],
                |row| row.get(0),
            )?;

            for source_id in source_ids {
                if *source_id == target_id {
                    continue;
                }
                let source_name: String = tx
                    .query_row(
                        "SELECT name FROM tags WHERE id = ?1",
                        params![source_id],
                        |row| row.get(0),
                    )
                    .optional()?
                    .ok_or_else(|| StorageError::NotFound(format!("tag {}", source_id)))?;

                // Rewrite assignments. OR IGNORE keeps (note, target) unique;
                // triggers on the actual inserts/deletes keep counters exact.
                let assignments: Vec<(String, String, String)> = {
                    let mut stmt = tx.prepare(
                        "SELECT note_id, created_at, source FROM note_tags WHERE tag_id = ?1",
                    )?;
                    let rows = stmt.query_map(params![source_id], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?;
                    rows.collect::<rusqlite::Result<_>>()?
                };
                for (note_id, created_at, source) in assignments {
                    tx.execute(
                        "INSERT OR IGNORE INTO note_tags (note_id, tag_id, created_at, source)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![note_id, target_id, created_at, source],
                    )?;
                }
                tx.execute("DELETE FROM note_tags WHERE tag_id = ?1", params![source_id])?;

                // Adopt the source's subtree before the cascade would eat it
                tx.execute(
                    "UPDATE tags SET parent_id = ?1 WHERE parent_id = ?2",
                    params![target_id, source_id],
                )?;
                rewrite_descendants(&tx, &source_name, &target)?;

                tx.execute("DELETE FROM tags WHERE id = ?1", params![source_id])?;
            }

            tx.commit()?;
            Ok(target_id)
        })?;

        self.get_tag(&target_id)?
            .ok_or_else(|| StorageError::NotFound(target_id))
    }

    /// Delete a tag outright. Note assignments go via cascade; counters of
    /// other tags are unaffected.
    pub fn delete_tag(&self, tag_id: &str) -> Result<bool> {
        self.with_write_retry(|conn| {
            let removed = conn.execute("DELETE FROM tags WHERE id = ?1", params![tag_id])?;
            Ok(removed > 0)
        })
    }

    /// Usage recency buckets (active/recent/stale/dormant at 7/30/90 days)
    pub fn tag_usage_stats(&self) -> Result<Vec<(String, String, i64, String)>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, name, use_count, recency FROM tag_usage_stats ORDER BY use_count DESC, name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

// ============================================================================
// TESTS
// ============================================================================
