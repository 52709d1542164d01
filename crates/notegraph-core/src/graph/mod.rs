//! Graph Module
//!
//! Typed edges between notes and modularity-based community detection over
//! them. Edges are undirected with canonical orientation enforced at insert
//! time; clustering consumes the raw undirected graph.

mod community;
mod edges;

pub use community::{detect_communities, louvain_partition, ClusterOutcome};
pub use edges::{build_edges_for_note, normalize_entity, EdgeStats};

use crate::storage::StorageError;

/// Graph construction / clustering error
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Underlying storage failure
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The note has no stored embedding yet
    #[error("No embedding stored for note {0}")]
    MissingEmbedding(String),
    /// The note does not exist
    #[error("Note not found: {0}")]
    NoteNotFound(String),
}

/// Graph result type
pub type Result<T> = std::result::Result<T, GraphError>;
