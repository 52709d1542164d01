//! SQLite Storage Implementation
//!
//! Core storage layer. Uses separate reader/writer connections for interior
//! mutability; all methods take `&self`, making [`Storage`] `Send + Sync` so
//! the HTTP layer can hold an `Arc<Storage>` without an outer lock.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use crate::note::{EpisodicMetadata, Note, ProspectiveMetadata};
use crate::search::sanitize_fts5_query;
use crate::tags;

use super::{
    ClusterRecord, EdgeRecord, GraphNode, GraphStats, LlmOperationRecord, Relation, Result,
    TagSource,
};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Storage error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Note, tag, or cluster not found
    #[error("Not found: {0}")]
    NotFound(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Payload (de)serialization error
    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),
    /// Invalid input (empty name, self-edge, bad relation)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
}

impl StorageError {
    /// Whether the error is a transient lock/busy condition worth one retry
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            StorageError::Database(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
        )
    }
}

// ============================================================================
// STORAGE
// ============================================================================

/// SQLite-backed storage with FTS5 and embedding blobs
pub struct Storage {
    pub(crate) writer: Mutex<Connection>,
    pub(crate) reader: Mutex<Connection>,
    path: PathBuf,
}

impl Storage {
    /// Apply PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (or create) the database at `path`, applying pending migrations
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let writer_conn = Connection::open(path)?;

        // Owner-only database file on Unix
        #[cfg(unix)]
        if path.exists() {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(path, perms);
        }

        Self::configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(path)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            path: path.to_path_buf(),
        })
    }

    /// Database file path
    pub fn db_path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn lock_writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StorageError::Init("Writer lock poisoned".into()))
    }

    pub(crate) fn lock_reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| StorageError::Init("Reader lock poisoned".into()))
    }

    /// Run a write closure, retrying once with jitter on a busy error
    pub(crate) fn with_write_retry<T>(
        &self,
        f: impl Fn(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        {
            let mut conn = self.lock_writer()?;
            match f(&mut conn) {
                Err(e) if e.is_busy() => {}
                other => return other,
            }
        }
        // One retry with sub-50ms jitter derived from the clock
        let jitter = (Utc::now().timestamp_subsec_millis() % 50) as u64;
        std::thread::sleep(std::time::Duration::from_millis(10 + jitter));
        let mut conn = self.lock_writer()?;
        f(&mut conn)
    }

    // ========================================================================
    // CAPTURE / NOTES
    // ========================================================================

    /// Persist a captured note in a single transaction: notes_meta row, FTS
    /// row, graph node payload, and tag assignments. Readers never observe
    /// partial state.
    pub fn persist_capture(
        &self,
        note: &Note,
        episodic: &EpisodicMetadata,
        prospective: &ProspectiveMetadata,
        body: &str,
    ) -> Result<()> {
        let episodic_json = serde_json::to_string(episodic)?;
        let prospective_json = serde_json::to_string(prospective)?;
        let tags_text = episodic.tags.join(" ");

        self.with_write_retry(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO notes_meta (id, title, path, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    note.id,
                    note.title,
                    note.path.to_string_lossy(),
                    note.created.to_rfc3339(),
                    note.updated.to_rfc3339(),
                ],
            )?;

            tx.execute(
                "INSERT INTO notes_fts (id, title, body, tags) VALUES (?1, ?2, ?3, ?4)",
                params![note.id, note.title, body, tags_text],
            )?;

            tx.execute(
                "INSERT INTO graph_nodes (note_id, episodic, prospective) VALUES (?1, ?2, ?3)",
                params![note.id, episodic_json, prospective_json],
            )?;

            for name in &episodic.tags {
                let tag_id = tags::ensure_tag(&tx, name, TagSource::User, note.created)?;
                tags::attach_tag_with_ancestors(&tx, &note.id, &tag_id, TagSource::User, note.created)?;
            }

            tx.commit()?;
            Ok(())
        })
    }

    /// Fetch one graph node with its stored payloads
    pub fn get_node(&self, id: &str) -> Result<Option<GraphNode>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(
            "SELECT n.id, n.title, n.path, n.created_at, n.updated_at,
                    g.episodic, g.prospective, g.cluster_id
             FROM notes_meta n
             JOIN graph_nodes g ON g.note_id = n.id
             WHERE n.id = ?1",
        )?;
        let node = stmt
            .query_row(params![id], Self::row_to_node)
            .optional()?
            .transpose()?;
        Ok(node)
    }

    /// All graph nodes, newest first
    pub fn list_nodes(&self) -> Result<Vec<GraphNode>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(
            "SELECT n.id, n.title, n.path, n.created_at, n.updated_at,
                    g.episodic, g.prospective, g.cluster_id
             FROM notes_meta n
             JOIN graph_nodes g ON g.note_id = n.id
             ORDER BY n.created_at DESC, n.id",
        )?;
        let rows = stmt.query_map([], Self::row_to_node)?;
        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(row??);
        }
        Ok(nodes)
    }

    fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<GraphNode>> {
        let episodic_json: String = row.get(5)?;
        let prospective_json: String = row.get(6)?;
        Ok((|| {
            Ok(GraphNode {
                id: row.get(0)?,
                title: row.get(1)?,
                path: row.get(2)?,
                created: row.get(3)?,
                updated: row.get(4)?,
                episodic: serde_json::from_str(&episodic_json)?,
                prospective: serde_json::from_str(&prospective_json)?,
                cluster_id: row.get(7)?,
            })
        })())
    }

    /// Delete a note and everything it owns. Returns the markdown path that
    /// was stored, or None when the note did not exist. Edges, payload,
    /// embedding, FTS row and tag assignments go with it (tag counters via
    /// triggers).
    pub fn delete_note(&self, id: &str) -> Result<Option<String>> {
        self.with_write_retry(|conn| {
            let tx = conn.transaction()?;
            let path: Option<String> = tx
                .query_row(
                    "SELECT path FROM notes_meta WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            if path.is_none() {
                return Ok(None);
            }
            tx.execute("DELETE FROM notes_meta WHERE id = ?1", params![id])?;
            tx.execute("DELETE FROM notes_fts WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(path)
        })
    }

    /// Total note count
    pub fn note_count(&self) -> Result<i64> {
        let reader = self.lock_reader()?;
        let count = reader.query_row("SELECT COUNT(*) FROM notes_meta", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Creation instants for a set of note ids (for deterministic tie-breaks)
    pub fn created_map(&self, ids: &[String]) -> Result<BTreeMap<String, DateTime<Utc>>> {
        let reader = self.lock_reader()?;
        let mut stmt =
            reader.prepare("SELECT created_at FROM notes_meta WHERE id = ?1")?;
        let mut map = BTreeMap::new();
        for id in ids {
            if let Some(created) = stmt
                .query_row(params![id], |row| row.get::<_, DateTime<Utc>>(0))
                .optional()?
            {
                map.insert(id.clone(), created);
            }
        }
        Ok(map)
    }

    // ========================================================================
    // FULL-TEXT SEARCH
    // ========================================================================

    /// Keyword search with FTS5. Returns `(note_id, score, snippet)` where
    /// score is `-bm25(...)` (higher is better), best first.
    pub fn fts_search(&self, query: &str, limit: usize) -> Result<Vec<(String, f64, String)>> {
        let sanitized = sanitize_fts5_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }

        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, -bm25(notes_fts) AS score,
                    snippet(notes_fts, 2, '', '', '…', 12) AS snip
             FROM notes_fts
             WHERE notes_fts MATCH ?1
             ORDER BY bm25(notes_fts)
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![sanitized, limit as i64], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ========================================================================
    // EMBEDDINGS
    // ========================================================================

    /// Upsert an embedding as a little-endian f32 blob
    pub fn store_embedding(&self, note_id: &str, vector: &[f32], model: &str) -> Result<()> {
        let blob: Vec<u8> = vector.iter().flat_map(|f| f.to_le_bytes()).collect();
        self.with_write_retry(|conn| {
            conn.execute(
                "INSERT INTO note_embeddings (note_id, embedding, dimensions, model, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(note_id) DO UPDATE SET
                     embedding = excluded.embedding,
                     dimensions = excluded.dimensions,
                     model = excluded.model,
                     created_at = excluded.created_at",
                params![note_id, blob, vector.len() as i64, model, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Load one note's embedding
    pub fn get_embedding(&self, note_id: &str) -> Result<Option<Vec<f32>>> {
        let reader = self.lock_reader()?;
        let blob: Option<Vec<u8>> = reader
            .query_row(
                "SELECT embedding FROM note_embeddings WHERE note_id = ?1",
                params![note_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob.map(|b| decode_embedding(&b)))
    }

    /// Load all embeddings, optionally excluding one note.
    /// Brute-force scans read from this snapshot.
    pub fn all_embeddings(&self, exclude: Option<&str>) -> Result<Vec<(String, Vec<f32>)>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader
            .prepare("SELECT note_id, embedding FROM note_embeddings ORDER BY note_id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, blob) = row?;
            if exclude.is_some_and(|e| e == id) {
                continue;
            }
            out.push((id, decode_embedding(&blob)));
        }
        Ok(out)
    }

    /// Note ids that have no stored embedding yet
    pub fn notes_missing_embedding(&self) -> Result<Vec<String>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(
            "SELECT n.id FROM notes_meta n
             LEFT JOIN note_embeddings e ON e.note_id = n.id
             WHERE e.note_id IS NULL
             ORDER BY n.id",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ========================================================================
    // EDGES
    // ========================================================================

    /// Insert an edge in canonical orientation. Re-inserting the same
    /// `(a, b, relation)` triple is a no-op; self-edges are rejected.
    pub fn insert_edge(
        &self,
        x: &str,
        y: &str,
        relation: Relation,
        weight: f64,
        metadata: Option<&serde_json::Value>,
    ) -> Result<bool> {
        if x == y {
            return Err(StorageError::InvalidInput(format!(
                "Self-edge rejected for note {}",
                x
            )));
        }
        let (a, b) = if x < y { (x, y) } else { (y, x) };
        let metadata_json = metadata.map(|m| m.to_string());

        self.with_write_retry(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO graph_edges (a, b, relation, weight, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    a,
                    b,
                    relation.as_str(),
                    weight,
                    metadata_json,
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(inserted > 0)
        })
    }

    /// All edges touching one note
    pub fn edges_for_note(&self, note_id: &str) -> Result<Vec<EdgeRecord>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(
            "SELECT a, b, relation, weight, metadata, created_at
             FROM graph_edges WHERE a = ?1 OR b = ?1",
        )?;
        let rows = stmt.query_map(params![note_id], Self::row_to_edge)?;
        collect_edges(rows)
    }

    /// List edges, optionally filtered by relation, newest first
    pub fn list_edges(&self, relation: Option<Relation>, limit: usize) -> Result<Vec<EdgeRecord>> {
        let reader = self.lock_reader()?;
        let mut out;
        match relation {
            Some(rel) => {
                let mut stmt = reader.prepare(
                    "SELECT a, b, relation, weight, metadata, created_at
                     FROM graph_edges WHERE relation = ?1
                     ORDER BY created_at DESC, a, b LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![rel.as_str(), limit as i64], Self::row_to_edge)?;
                out = collect_edges(rows)?;
            }
            None => {
                let mut stmt = reader.prepare(
                    "SELECT a, b, relation, weight, metadata, created_at
                     FROM graph_edges ORDER BY created_at DESC, a, b LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit as i64], Self::row_to_edge)?;
                out = collect_edges(rows)?;
            }
        }
        out.shrink_to_fit();
        Ok(out)
    }

    /// Snapshot of every edge (community detection input)
    pub fn all_edges(&self) -> Result<Vec<EdgeRecord>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(
            "SELECT a, b, relation, weight, metadata, created_at
             FROM graph_edges ORDER BY a, b, relation",
        )?;
        let rows = stmt.query_map([], Self::row_to_edge)?;
        collect_edges(rows)
    }

    fn row_to_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<EdgeRecord>> {
        let relation_str: String = row.get(2)?;
        let metadata_json: Option<String> = row.get(4)?;
        Ok((|| {
            let relation = Relation::parse_name(&relation_str).ok_or_else(|| {
                StorageError::InvalidInput(format!("Unknown relation: {}", relation_str))
            })?;
            let metadata = metadata_json
                .map(|m| serde_json::from_str(&m))
                .transpose()?;
            Ok(EdgeRecord {
                a: row.get(0)?,
                b: row.get(1)?,
                relation,
                weight: row.get(3)?,
                metadata,
                created_at: row.get(5)?,
            })
        })())
    }

    /// Node and edge totals, edges broken down by relation
    pub fn graph_stats(&self) -> Result<GraphStats> {
        let reader = self.lock_reader()?;
        let total_notes =
            reader.query_row("SELECT COUNT(*) FROM notes_meta", [], |row| row.get(0))?;
        let total_edges =
            reader.query_row("SELECT COUNT(*) FROM graph_edges", [], |row| row.get(0))?;

        let mut stmt = reader
            .prepare("SELECT relation, COUNT(*) FROM graph_edges GROUP BY relation")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        let mut edges_by_relation = BTreeMap::new();
        for row in rows {
            let (relation, count) = row?;
            edges_by_relation.insert(relation, count);
        }

        Ok(GraphStats {
            total_notes,
            total_edges,
            edges_by_relation,
        })
    }

    // ========================================================================
    // CLUSTERS
    // ========================================================================

    /// Replace all cluster state atomically: wipe `graph_clusters` and every
    /// `cluster_id`, then write the new partition in the same transaction.
    pub fn replace_clusters(
        &self,
        clusters: &[ClusterRecord],
        assignments: &[(String, i64)],
    ) -> Result<()> {
        self.with_write_retry(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM graph_clusters", [])?;
            tx.execute("UPDATE graph_nodes SET cluster_id = NULL", [])?;

            for cluster in clusters {
                tx.execute(
                    "INSERT INTO graph_clusters (id, title, summary, size, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        cluster.id,
                        cluster.title,
                        cluster.summary,
                        cluster.size,
                        cluster.created_at.to_rfc3339(),
                        cluster.updated_at.to_rfc3339(),
                    ],
                )?;
            }
            for (note_id, cluster_id) in assignments {
                tx.execute(
                    "UPDATE graph_nodes SET cluster_id = ?1 WHERE note_id = ?2",
                    params![cluster_id, note_id],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
    }

    /// All clusters, largest first
    pub fn list_clusters(&self) -> Result<Vec<ClusterRecord>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, title, summary, size, created_at, updated_at
             FROM graph_clusters ORDER BY size DESC, id",
        )?;
        let rows = stmt.query_map([], Self::row_to_cluster)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// One cluster by id
    pub fn get_cluster(&self, id: i64) -> Result<Option<ClusterRecord>> {
        let reader = self.lock_reader()?;
        let cluster = reader
            .query_row(
                "SELECT id, title, summary, size, created_at, updated_at
                 FROM graph_clusters WHERE id = ?1",
                params![id],
                Self::row_to_cluster,
            )
            .optional()?;
        Ok(cluster)
    }

    /// Member note ids of a cluster
    pub fn cluster_members(&self, id: i64) -> Result<Vec<String>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader
            .prepare("SELECT note_id FROM graph_nodes WHERE cluster_id = ?1 ORDER BY note_id")?;
        let rows = stmt.query_map(params![id], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn row_to_cluster(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClusterRecord> {
        Ok(ClusterRecord {
            id: row.get(0)?,
            title: row.get(1)?,
            summary: row.get(2)?,
            size: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    // ========================================================================
    // LLM AUDIT TRAIL
    // ========================================================================

    /// Append one LLM invocation record
    pub fn record_llm_operation(&self, op: &LlmOperationRecord) -> Result<()> {
        self.with_write_retry(|conn| {
            conn.execute(
                "INSERT INTO llm_operations
                     (note_id, kind, prompt_text, raw_response, parsed_output_json,
                      tokens_in, tokens_out, duration_ms, cost_usd, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    op.note_id,
                    op.kind,
                    op.prompt_text,
                    op.raw_response,
                    op.parsed_output_json,
                    op.tokens_in,
                    op.tokens_out,
                    op.duration_ms,
                    op.cost_usd,
                    op.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// Recent LLM invocations, newest first
    pub fn list_llm_operations(&self, limit: usize) -> Result<Vec<LlmOperationRecord>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, note_id, kind, prompt_text, raw_response, parsed_output_json,
                    tokens_in, tokens_out, duration_ms, cost_usd, created_at
             FROM llm_operations ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(LlmOperationRecord {
                id: row.get(0)?,
                note_id: row.get(1)?,
                kind: row.get(2)?,
                prompt_text: row.get(3)?,
                raw_response: row.get(4)?,
                parsed_output_json: row.get(5)?,
                tokens_in: row.get(6)?,
                tokens_out: row.get(7)?,
                duration_ms: row.get(8)?,
                cost_usd: row.get(9)?,
                created_at: row.get(10)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

/// Decode a little-endian f32 blob
fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn collect_edges<'a>(
    rows: impl Iterator<Item = rusqlite::Result<Result<EdgeRecord>>> + 'a,
) -> Result<Vec<EdgeRecord>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row??);
    }
    Ok(out)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::{ProspectiveItem, TimeKind, TimeReference};
    use chrono::TimeZone;

    fn test_storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(&dir.path().join("test.db")).unwrap();
        (dir, storage)
    }

    fn sample_note(id: &str, title: &str) -> Note {
        let created = Utc.with_ymd_and_hms(2025, 10, 20, 12, 0, 0).unwrap();
        Note {
            id: id.to_string(),
            title: title.to_string(),
            path: std::path::PathBuf::from(format!("/notes/{}.md", id)),
            created,
            updated: created,
        }
    }

    fn capture(storage: &Storage, id: &str, title: &str, body: &str, tags: &[&str]) {
        let episodic = EpisodicMetadata {
            title: title.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        };
        storage
            .persist_capture(
                &sample_note(id, title),
                &episodic,
                &ProspectiveMetadata::default(),
                body,
            )
            .unwrap();
    }

    #[test]
    fn test_capture_is_atomic_and_complete() {
        let (_dir, storage) = test_storage();
        capture(&storage, "n1", "Vector search", "Notes about FAISS and HNSW", &["ml"]);

        let node = storage.get_node("n1").unwrap().unwrap();
        assert_eq!(node.title, "Vector search");
        assert_eq!(node.episodic.tags, vec!["ml"]);
        assert_eq!(storage.note_count().unwrap(), 1);

        // FTS row exists and matches
        let hits = storage.fts_search("faiss", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "n1");
        assert!(hits[0].1 > 0.0);
    }

    #[test]
    fn test_capture_duplicate_id_rolls_back() {
        let (_dir, storage) = test_storage();
        capture(&storage, "n1", "First", "body one", &[]);

        let episodic = EpisodicMetadata {
            title: "Second".to_string(),
            ..Default::default()
        };
        let err = storage.persist_capture(
            &sample_note("n1", "Second"),
            &episodic,
            &ProspectiveMetadata::default(),
            "body two",
        );
        assert!(err.is_err());

        // Only the first FTS row is visible
        assert_eq!(storage.fts_search("one", 10).unwrap().len(), 1);
        assert_eq!(storage.fts_search("two", 10).unwrap().len(), 0);
    }

    #[test]
    fn test_payload_round_trip() {
        let (_dir, storage) = test_storage();
        let when = Utc.with_ymd_and_hms(2025, 10, 20, 14, 0, 0).unwrap();
        let episodic = EpisodicMetadata {
            who: vec!["Sarah".to_string()],
            what: vec!["FAISS".to_string()],
            where_: vec!["Café Awesome".to_string()],
            when: vec![TimeReference {
                original: "2pm".to_string(),
                parsed: Some(when),
                kind: TimeKind::Absolute,
            }],
            tags: vec![],
            title: "Meeting".to_string(),
        };
        let prospective = ProspectiveMetadata {
            contains_prospective: true,
            items: vec![ProspectiveItem {
                content: "follow up".to_string(),
                timedata: Some(when),
            }],
        };
        storage
            .persist_capture(&sample_note("n1", "Meeting"), &episodic, &prospective, "body")
            .unwrap();

        let node = storage.get_node("n1").unwrap().unwrap();
        assert_eq!(node.episodic.who, vec!["Sarah"]);
        assert_eq!(node.episodic.where_, vec!["Café Awesome"]);
        assert_eq!(node.episodic.when[0].parsed, Some(when));
        assert!(node.prospective.contains_prospective);
        assert_eq!(node.prospective.items[0].timedata, Some(when));
    }

    #[test]
    fn test_embedding_upsert_round_trip() {
        let (_dir, storage) = test_storage();
        capture(&storage, "n1", "Note", "body", &[]);

        storage.store_embedding("n1", &[0.6, 0.8], "test-model").unwrap();
        let v = storage.get_embedding("n1").unwrap().unwrap();
        assert_eq!(v, vec![0.6, 0.8]);

        // Upsert replaces
        storage.store_embedding("n1", &[1.0, 0.0], "test-model").unwrap();
        let v = storage.get_embedding("n1").unwrap().unwrap();
        assert_eq!(v, vec![1.0, 0.0]);
        assert_eq!(storage.all_embeddings(None).unwrap().len(), 1);
        assert!(storage.all_embeddings(Some("n1")).unwrap().is_empty());
    }

    #[test]
    fn test_edge_canonical_orientation_and_dedup() {
        let (_dir, storage) = test_storage();
        capture(&storage, "a1", "A", "body", &[]);
        capture(&storage, "b1", "B", "body", &[]);

        // Inserted reversed; stored canonical
        assert!(storage.insert_edge("b1", "a1", Relation::Semantic, 0.7, None).unwrap());
        // Duplicate triple is a no-op
        assert!(!storage.insert_edge("a1", "b1", Relation::Semantic, 0.9, None).unwrap());
        // Same pair, different relation is a distinct edge
        assert!(storage
            .insert_edge("a1", "b1", Relation::EntityLink, 2.0, None)
            .unwrap());

        let edges = storage.edges_for_note("a1").unwrap();
        assert_eq!(edges.len(), 2);
        for edge in &edges {
            assert!(edge.a < edge.b);
        }

        // Self-edge rejected
        assert!(storage.insert_edge("a1", "a1", Relation::Semantic, 1.0, None).is_err());
    }

    #[test]
    fn test_delete_note_cascades() {
        let (_dir, storage) = test_storage();
        capture(&storage, "n1", "First", "alpha body", &["project/alpha"]);
        capture(&storage, "n2", "Second", "beta body", &["project/alpha"]);
        storage.store_embedding("n1", &[1.0, 0.0], "m").unwrap();
        storage.insert_edge("n1", "n2", Relation::Semantic, 0.8, None).unwrap();

        let path = storage.delete_note("n1").unwrap();
        assert_eq!(path.as_deref(), Some("/notes/n1.md"));

        assert!(storage.get_node("n1").unwrap().is_none());
        assert!(storage.get_embedding("n1").unwrap().is_none());
        assert!(storage.edges_for_note("n2").unwrap().is_empty());
        assert!(storage.fts_search("alpha", 10).unwrap().is_empty());

        // Tag counter decremented by trigger via cascade
        let tag = storage.find_tag_by_name("project/alpha").unwrap().unwrap();
        assert_eq!(tag.use_count, 1);

        // Deleting again is a no-op
        assert!(storage.delete_note("n1").unwrap().is_none());
    }

    #[test]
    fn test_replace_clusters_atomic() {
        let (_dir, storage) = test_storage();
        capture(&storage, "n1", "A", "body", &[]);
        capture(&storage, "n2", "B", "body", &[]);

        let now = Utc::now();
        let clusters = vec![ClusterRecord {
            id: 1,
            title: Some("Graph Retrieval Notes".to_string()),
            summary: Some("Notes about retrieval.".to_string()),
            size: 2,
            created_at: now,
            updated_at: now,
        }];
        let assignments = vec![("n1".to_string(), 1), ("n2".to_string(), 1)];
        storage.replace_clusters(&clusters, &assignments).unwrap();

        assert_eq!(storage.list_clusters().unwrap().len(), 1);
        assert_eq!(storage.cluster_members(1).unwrap(), vec!["n1", "n2"]);
        assert_eq!(storage.get_node("n1").unwrap().unwrap().cluster_id, Some(1));

        // Regeneration wipes prior state
        storage.replace_clusters(&[], &[]).unwrap();
        assert!(storage.list_clusters().unwrap().is_empty());
        assert_eq!(storage.get_node("n1").unwrap().unwrap().cluster_id, None);
    }

    #[test]
    fn test_graph_stats() {
        let (_dir, storage) = test_storage();
        capture(&storage, "n1", "A", "body", &[]);
        capture(&storage, "n2", "B", "body", &[]);
        storage.insert_edge("n1", "n2", Relation::Semantic, 0.8, None).unwrap();
        storage.insert_edge("n1", "n2", Relation::TagLink, 0.5, None).unwrap();

        let stats = storage.graph_stats().unwrap();
        assert_eq!(stats.total_notes, 2);
        assert_eq!(stats.total_edges, 2);
        assert_eq!(stats.edges_by_relation.get("semantic"), Some(&1));
        assert_eq!(stats.edges_by_relation.get("tag_link"), Some(&1));
    }

    #[test]
    fn test_llm_operation_audit() {
        let (_dir, storage) = test_storage();
        storage
            .record_llm_operation(&LlmOperationRecord {
                id: 0,
                note_id: Some("n1".to_string()),
                kind: "episodic".to_string(),
                prompt_text: "prompt".to_string(),
                raw_response: Some("{}".to_string()),
                parsed_output_json: Some("{}".to_string()),
                tokens_in: Some(100),
                tokens_out: Some(20),
                duration_ms: 150,
                cost_usd: None,
                created_at: Utc::now(),
            })
            .unwrap();

        let ops = storage.list_llm_operations(10).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, "episodic");
        assert_eq!(ops[0].tokens_out, Some(20));
    }
}
