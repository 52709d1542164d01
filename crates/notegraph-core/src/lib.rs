//! # Notegraph Core
//!
//! Engine of a local, privacy-preserving personal knowledge graph. Free-form
//! markdown notes become a multi-layer graph:
//!
//! - **Ingestion**: hybrid LLM + rule extraction of WHO/WHAT/WHERE/WHEN,
//!   hashtags, and prospective items, persisted transactionally
//! - **Graph construction**: dense embeddings plus three typed edge classes
//!   (`semantic`, `entity_link`, `tag_link`) built in the background
//! - **Community detection**: Louvain modularity over the edge graph with
//!   LLM-labeled clusters
//! - **Hybrid retrieval**: FTS5 + cosine fusion, typed-edge expansion, and
//!   streamed LLM synthesis
//!
//! Everything runs against local capabilities only: a SQLite file, a local
//! LLM endpoint, and a local embedding model. The markdown files own the
//! note bodies; the database owns all metadata.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use notegraph_core::{capture_note, index_note, Config, LlmClient, Storage};
//!
//! let config = Config::default();
//! let storage = Storage::open(&config.db_path)?;
//! let llm = LlmClient::from_config(&config);
//!
//! let captured = capture_note(&storage, &llm, &config, "Met Sarah about FAISS #ml").await?;
//! println!("{} -> {}", captured.note_id, captured.title);
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod config;
pub mod embedding;
pub mod extract;
pub mod graph;
pub mod ingest;
pub mod llm;
pub mod note;
pub mod search;
pub mod storage;
pub mod synthesis;
pub mod tags;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use config::Config;

pub use note::{
    generate_note_id, note_filename, slugify, write_note_file, EpisodicMetadata, Note,
    ProspectiveItem, ProspectiveMetadata, TimeKind, TimeReference,
};

pub use storage::{
    ClusterRecord, EdgeRecord, GraphNode, GraphStats, LlmOperationRecord, Relation, Storage,
    StorageError, TagRecord, TagSource,
};

pub use extract::{
    extract_episodic, extract_prospective, parse_hashtags, parse_time_references, Extraction,
};

pub use embedding::{
    cosine_similarity, dot_product, l2_normalize, top_k_similar, EmbeddingClient, EmbeddingError,
};

pub use graph::{
    build_edges_for_note, detect_communities, louvain_partition, normalize_entity, ClusterOutcome,
    EdgeStats, GraphError,
};

pub use llm::{extract_json_object, ChatOutcome, LlmClient, LlmError};

pub use search::{
    sanitize_fts5_query, ClusterContext, ExpandedResult, HybridRetriever, PrimaryResult,
    SearchOptions, SearchResponse,
};

pub use synthesis::{build_context, synthesize_stream, SynthesisEvent};

pub use ingest::{capture_note, index_note, rebuild_edges, CaptureResult, IngestError, NoteLocks};

pub use tags::normalize_tag_name;

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
