//! Database Migrations
//!
//! Schema migration definitions for the storage layer.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "Initial schema: notes, FTS5, tags with triggers, edges, clusters, audit",
    up: MIGRATION_V1_UP,
}];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial schema
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS notes_meta (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    path TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notes_created ON notes_meta(created_at);

-- Graph node payload: episodic + prospective metadata as JSON, plus the
-- mutable cluster assignment. Exactly one row per note.
CREATE TABLE IF NOT EXISTS graph_nodes (
    note_id TEXT PRIMARY KEY REFERENCES notes_meta(id) ON DELETE CASCADE,
    episodic TEXT NOT NULL DEFAULT '{}',
    prospective TEXT NOT NULL DEFAULT '{}',
    cluster_id INTEGER
);

CREATE INDEX IF NOT EXISTS idx_graph_nodes_cluster ON graph_nodes(cluster_id);

-- FTS5 virtual table over title/body/tags. The body lives on disk, so the
-- row is maintained by the capture/delete transactions rather than by
-- content-table triggers.
CREATE VIRTUAL TABLE IF NOT EXISTS notes_fts USING fts5(
    id UNINDEXED,
    title,
    body,
    tags,
    tokenize='porter ascii'
);

-- Embeddings storage (little-endian f32 blob)
CREATE TABLE IF NOT EXISTS note_embeddings (
    note_id TEXT PRIMARY KEY REFERENCES notes_meta(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    model TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Hierarchical tags. name is canonical lowercase, unique case-insensitively.
CREATE TABLE IF NOT EXISTS tags (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE COLLATE NOCASE,
    parent_id TEXT REFERENCES tags(id) ON DELETE CASCADE,
    level INTEGER NOT NULL DEFAULT 0,
    use_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    last_used_at TEXT,
    source TEXT NOT NULL DEFAULT 'user'
);

CREATE INDEX IF NOT EXISTS idx_tags_parent ON tags(parent_id);

CREATE TABLE IF NOT EXISTS note_tags (
    note_id TEXT NOT NULL REFERENCES notes_meta(id) ON DELETE CASCADE,
    tag_id TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT 'user',
    PRIMARY KEY (note_id, tag_id)
);

CREATE INDEX IF NOT EXISTS idx_note_tags_tag ON note_tags(tag_id);

-- Triggers keep tags.use_count equal to the number of note_tags rows.
CREATE TRIGGER IF NOT EXISTS note_tags_ai AFTER INSERT ON note_tags BEGIN
    UPDATE tags SET use_count = use_count + 1, last_used_at = NEW.created_at
    WHERE id = NEW.tag_id;
END;

CREATE TRIGGER IF NOT EXISTS note_tags_ad AFTER DELETE ON note_tags BEGIN
    UPDATE tags SET use_count = use_count - 1
    WHERE id = OLD.tag_id;
END;

-- Undirected typed edges in canonical orientation (a < b), enforced at
-- insert time. relation: 'semantic' | 'entity_link' | 'tag_link'.
CREATE TABLE IF NOT EXISTS graph_edges (
    a TEXT NOT NULL REFERENCES notes_meta(id) ON DELETE CASCADE,
    b TEXT NOT NULL REFERENCES notes_meta(id) ON DELETE CASCADE,
    relation TEXT NOT NULL,
    weight REAL NOT NULL,
    metadata TEXT,
    created_at TEXT NOT NULL,
    PRIMARY KEY (a, b, relation),
    CHECK (a < b)
);

CREATE INDEX IF NOT EXISTS idx_edges_a ON graph_edges(a);
CREATE INDEX IF NOT EXISTS idx_edges_b ON graph_edges(b);
CREATE INDEX IF NOT EXISTS idx_edges_relation ON graph_edges(relation);

-- Detected communities. Regenerated wholesale; rows never updated in place.
CREATE TABLE IF NOT EXISTS graph_clusters (
    id INTEGER PRIMARY KEY,
    title TEXT,
    summary TEXT,
    size INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Audit trail for every LLM invocation.
-- kind: 'episodic' | 'prospective' | 'cluster_title' | 'synthesis'.
CREATE TABLE IF NOT EXISTS llm_operations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    note_id TEXT,
    kind TEXT NOT NULL,
    prompt_text TEXT NOT NULL,
    raw_response TEXT,
    parsed_output_json TEXT,
    tokens_in INTEGER,
    tokens_out INTEGER,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    cost_usd REAL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_llm_ops_note ON llm_operations(note_id);
CREATE INDEX IF NOT EXISTS idx_llm_ops_kind ON llm_operations(kind);

-- Tag hierarchy view: each tag with its parent and direct-child count.
CREATE VIEW IF NOT EXISTS tags_with_hierarchy AS
SELECT t.id, t.name, t.parent_id, p.name AS parent_name, t.level,
       t.use_count, t.created_at, t.last_used_at, t.source,
       (SELECT COUNT(*) FROM tags c WHERE c.parent_id = t.id) AS child_count
FROM tags t
LEFT JOIN tags p ON t.parent_id = p.id;

-- Recency buckets at 7/30/90 days.
CREATE VIEW IF NOT EXISTS tag_usage_stats AS
SELECT t.id, t.name, t.use_count, t.last_used_at,
       CASE
           WHEN t.last_used_at IS NULL THEN 'dormant'
           WHEN date(t.last_used_at) >= date('now', '-7 days') THEN 'active'
           WHEN date(t.last_used_at) >= date('now', '-30 days') THEN 'recent'
           WHEN date(t.last_used_at) >= date('now', '-90 days') THEN 'stale'
           ELSE 'dormant'
       END AS recency
FROM tags t;

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );

            // execute_batch handles multi-statement SQL including triggers
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}
