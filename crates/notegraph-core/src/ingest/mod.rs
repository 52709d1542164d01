//! Ingestion Orchestrator
//!
//! The write path: generate the note id, write the markdown file atomically,
//! run episodic then prospective extraction (in that order — prospective
//! binds to the episodic WHEN list), persist everything in one transaction,
//! and hand back the response. Embedding and edge construction run
//! afterwards as a background task keyed by note id.
//!
//! Extraction failures never fail a capture: the note persists with empty
//! metadata and a first-line title. A storage failure deletes the on-disk
//! file (best effort) and surfaces to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::extract::{extract_episodic, extract_prospective};
use crate::graph::build_edges_for_note;
use crate::llm::LlmClient;
use crate::note::{generate_note_id, note_filename, write_note_file, EpisodicMetadata, Note};
use crate::storage::{Storage, StorageError};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Capture error
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Empty or whitespace-only note text
    #[error("Note text must not be empty")]
    EmptyText,
    /// Persist failure (the markdown file has been cleaned up)
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Could not write the markdown file
    #[error("Failed to write note file: {0}")]
    Io(#[from] std::io::Error),
}

/// Ingest result type
pub type Result<T> = std::result::Result<T, IngestError>;

// ============================================================================
// PER-NOTE SERIALIZATION
// ============================================================================

/// Async mutex registry keyed by note id. Writes to the same note (initial
/// indexing, manual edge rebuilds) serialize here; different notes proceed
/// concurrently.
#[derive(Default)]
pub struct NoteLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl NoteLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for one note id, creating it on first use
    pub async fn acquire(&self, note_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(note_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

// ============================================================================
// CAPTURE
// ============================================================================

/// Response payload for a successful capture
#[derive(Debug, Clone, Serialize)]
pub struct CaptureResult {
    pub note_id: String,
    pub title: String,
    pub episodic: EpisodicMetadata,
    pub path: String,
}

/// Capture one note: extract, write the file, persist transactionally.
/// Returns as soon as the transaction commits; the caller schedules
/// [`index_note`] for the heavy background work.
pub async fn capture_note(
    storage: &Storage,
    llm: &LlmClient,
    config: &Config,
    text: &str,
) -> Result<CaptureResult> {
    if text.trim().is_empty() {
        return Err(IngestError::EmptyText);
    }

    let now = Utc::now();
    let note_id = generate_note_id(now);

    // Extraction order is a hard dependency: prospective sees episodic WHEN
    let episodic = extract_episodic(llm, &note_id, text, now).await;
    let prospective =
        extract_prospective(llm, &note_id, text, &episodic.value.when).await;

    let path = config
        .notes_dir
        .join(note_filename(now, &episodic.value.title));
    write_note_file(&path, text)?;

    let note = Note {
        id: note_id.clone(),
        title: episodic.value.title.clone(),
        path: path.clone(),
        created: now,
        updated: now,
    };

    if let Err(e) = storage.persist_capture(&note, &episodic.value, &prospective.value, text) {
        // No half-ingested notes: the database rolled back, so the file
        // goes too
        if let Err(io) = std::fs::remove_file(&path) {
            tracing::warn!(note_id, error = %io, "Failed to clean up note file after persist failure");
        }
        return Err(e.into());
    }

    for audit in [&episodic.audit, &prospective.audit] {
        if let Err(e) = storage.record_llm_operation(audit) {
            tracing::warn!(note_id, error = %e, "Failed to record extraction audit row");
        }
    }

    tracing::info!(note_id, title = %note.title, "Note captured");
    Ok(CaptureResult {
        note_id,
        title: note.title,
        episodic: episodic.value,
        path: path.to_string_lossy().into_owned(),
    })
}

// ============================================================================
// BACKGROUND INDEXING
// ============================================================================

/// Background step for one note: generate and store its embedding, then
/// build all three edge classes. A note that already has a stored vector
/// keeps it and goes straight to the edge pass, so repair sweeps never
/// re-embed the whole corpus. Failures are logged and abandoned — the note
/// stays searchable via FTS and `rebuild_edges` can repair later.
pub async fn index_note(
    storage: &Storage,
    embedder: &EmbeddingClient,
    config: &Config,
    locks: &NoteLocks,
    note_id: &str,
) {
    let _guard = locks.acquire(note_id).await;

    let Ok(Some(node)) = storage.get_node(note_id) else {
        tracing::warn!(note_id, "Skipping indexing: note vanished before background task ran");
        return;
    };

    let already_embedded = match storage.get_embedding(note_id) {
        Ok(existing) => existing.is_some(),
        Err(e) => {
            tracing::error!(note_id, error = %e, "Failed to check for an existing embedding");
            return;
        }
    };

    if !already_embedded {
        let text = match std::fs::read_to_string(&node.path) {
            Ok(body) => format!("{}\n\n{}", node.title, body),
            Err(e) => {
                tracing::warn!(note_id, error = %e, "Note file unreadable, embedding title only");
                node.title.clone()
            }
        };

        let vector = match embedder.embed(&text).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!(note_id, error = %e, "Embedding failed; note remains FTS-searchable");
                return;
            }
        };
        if let Err(e) = storage.store_embedding(note_id, &vector, embedder.model()) {
            tracing::error!(note_id, error = %e, "Failed to store embedding");
            return;
        }
    }

    match build_edges_for_note(storage, config, note_id) {
        Ok(stats) => {
            tracing::info!(note_id, %stats, "Edges built");
        }
        Err(e) => {
            tracing::error!(note_id, error = %e, "Edge construction failed");
        }
    }
}

/// Manual repair after abandoned background work. With a note id, just
/// that note; otherwise the whole corpus. Notes missing an embedding get
/// embedded and wired up; notes that already have one only get the edge
/// pass (the stored vector is kept). Returns the number of notes
/// processed.
pub async fn rebuild_edges(
    storage: &Storage,
    embedder: &EmbeddingClient,
    config: &Config,
    locks: &NoteLocks,
    note_id: Option<&str>,
) -> crate::storage::Result<usize> {
    let targets: Vec<String> = match note_id {
        Some(id) => vec![id.to_string()],
        None => {
            let mut ids = storage.notes_missing_embedding()?;
            let mut with_embedding: Vec<String> = storage
                .all_embeddings(None)?
                .into_iter()
                .map(|(id, _)| id)
                .collect();
            ids.append(&mut with_embedding);
            ids
        }
    };

    let mut processed = 0;
    for id in &targets {
        if storage.get_node(id)?.is_none() {
            continue;
        }
        index_note(storage, embedder, config, locks, id).await;
        processed += 1;
    }
    Ok(processed)
}

// ============================================================================
// TESTS
// ============================================================================
