//! Notegraph server binary
//!
//! Single-process HTTP server over the local knowledge graph: note capture
//! with LLM extraction, background embedding + edge construction, community
//! detection, hybrid retrieval, and SSE synthesis. Every configuration knob
//! is a flag with an environment fallback.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use notegraph_core::{Config, Storage};
use notegraph_server::api;

#[derive(Debug, Parser)]
#[command(name = "notegraph-server", version, about = "Local personal knowledge graph server")]
struct Args {
    /// Address to bind
    #[arg(long, env = "NOTEGRAPH_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to bind
    #[arg(long, env = "NOTEGRAPH_PORT", default_value_t = 8734)]
    port: u16,

    /// Directory holding flat *.md note files (default: ~/Notes)
    #[arg(long, env = "NOTEGRAPH_NOTES_DIR")]
    notes_dir: Option<PathBuf>,

    /// Database file (default: <notes-dir>/.index/notegraph.db)
    #[arg(long, env = "NOTEGRAPH_DB_PATH")]
    db_path: Option<PathBuf>,

    /// OpenAI-compatible chat endpoint of the local LLM
    #[arg(long, env = "NOTEGRAPH_LLM_ENDPOINT")]
    llm_endpoint: Option<String>,

    /// Model name for LLM calls
    #[arg(long, env = "NOTEGRAPH_LLM_MODEL")]
    llm_model: Option<String>,

    /// Embedding endpoint of the local embedding model
    #[arg(long, env = "NOTEGRAPH_EMBEDDING_ENDPOINT")]
    embedding_endpoint: Option<String>,

    /// Embedding model id
    #[arg(long, env = "NOTEGRAPH_EMBEDDING_MODEL")]
    embedding_model: Option<String>,

    /// Embedding dimension; fixed once per corpus
    #[arg(long, env = "NOTEGRAPH_EMBEDDING_DIMENSIONS")]
    embedding_dimensions: Option<usize>,

    /// Cosine floor for semantic edges
    #[arg(long, env = "NOTEGRAPH_SEMANTIC_THRESHOLD")]
    semantic_threshold: Option<f32>,

    /// Jaccard floor for tag_link edges
    #[arg(long, env = "NOTEGRAPH_TAG_JACCARD_THRESHOLD")]
    tag_jaccard_threshold: Option<f32>,

    /// Louvain resolution for community detection
    #[arg(long, env = "NOTEGRAPH_CLUSTER_RESOLUTION")]
    cluster_resolution: Option<f64>,

    /// Default graph-expansion hops (hard cap 2)
    #[arg(long, env = "NOTEGRAPH_MAX_HOPS")]
    max_hops: Option<u32>,

    /// Full-text weight in hybrid fusion
    #[arg(long, env = "NOTEGRAPH_FTS_WEIGHT")]
    fts_weight: Option<f32>,

    /// Vector weight in hybrid fusion
    #[arg(long, env = "NOTEGRAPH_VECTOR_WEIGHT")]
    vector_weight: Option<f32>,

    /// Per-call LLM timeout in seconds
    #[arg(long, env = "NOTEGRAPH_LLM_TIMEOUT_SECS")]
    llm_timeout_secs: Option<u64>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<(Config, SocketAddr)> {
        let mut config = Config::default();

        if let Some(notes_dir) = self.notes_dir {
            config.db_path = notes_dir.join(".index").join("notegraph.db");
            config.notes_dir = notes_dir;
        }
        if let Some(db_path) = self.db_path {
            config.db_path = db_path;
        }
        if let Some(v) = self.llm_endpoint {
            config.llm_endpoint = v;
        }
        if let Some(v) = self.llm_model {
            config.llm_model = v;
        }
        if let Some(v) = self.embedding_endpoint {
            config.embedding_endpoint = v;
        }
        if let Some(v) = self.embedding_model {
            config.embedding_model = v;
        }
        if let Some(v) = self.embedding_dimensions {
            config.embedding_dimensions = v;
        }
        if let Some(v) = self.semantic_threshold {
            config.semantic_threshold = v;
        }
        if let Some(v) = self.tag_jaccard_threshold {
            config.tag_jaccard_threshold = v;
        }
        if let Some(v) = self.cluster_resolution {
            config.cluster_resolution = v;
        }
        if let Some(v) = self.max_hops {
            config.max_expansion_hops = v;
        }
        if let Some(v) = self.fts_weight {
            config.fts_weight = v;
        }
        if let Some(v) = self.vector_weight {
            config.vector_weight = v;
        }
        if let Some(v) = self.llm_timeout_secs {
            config.llm_timeout_secs = v;
        }

        if (config.fts_weight + config.vector_weight - 1.0).abs() > 1e-6 {
            bail!(
                "Fusion weights must sum to 1.0 (got fts={} vector={})",
                config.fts_weight,
                config.vector_weight
            );
        }
        if config.embedding_dimensions == 0 {
            bail!("Embedding dimension must be positive");
        }

        let addr: SocketAddr = format!("{}:{}", self.host, self.port)
            .parse()
            .context("Invalid host/port")?;
        Ok((config, addr))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (config, addr) = Args::parse().into_config()?;

    std::fs::create_dir_all(&config.notes_dir)
        .with_context(|| format!("Creating notes directory {:?}", config.notes_dir))?;
    let storage = Storage::open(&config.db_path)
        .with_context(|| format!("Opening database {:?}", config.db_path))?;

    info!(
        notes_dir = %config.notes_dir.display(),
        db_path = %config.db_path.display(),
        llm = %config.llm_model,
        embedding = %config.embedding_model,
        "Notegraph starting"
    );

    let state = api::AppState::new(storage, config);
    api::serve(state, addr).await?;
    Ok(())
}
