//! Shared application state

use std::sync::Arc;

use notegraph_core::{
    Config, EmbeddingClient, HybridRetriever, LlmClient, NoteLocks, Storage,
};

/// State shared by every handler. `Storage` is internally synchronized, the
/// inference clients are cheap clones over one process-wide HTTP client, and
/// `NoteLocks` serializes background work per note id.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub config: Arc<Config>,
    pub llm: LlmClient,
    pub embedder: EmbeddingClient,
    pub retriever: Arc<HybridRetriever>,
    pub locks: Arc<NoteLocks>,
}

impl AppState {
    pub fn new(storage: Storage, config: Config) -> Self {
        let llm = LlmClient::from_config(&config);
        let embedder = EmbeddingClient::from_config(&config);
        Self {
            storage: Arc::new(storage),
            config: Arc::new(config),
            llm,
            embedder,
            retriever: Arc::new(HybridRetriever::new()),
            locks: Arc::new(NoteLocks::new()),
        }
    }
}
