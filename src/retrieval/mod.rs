//! The engine façade: indexing, ranked retrieval and feedback for one
//! collection.
mod engine;

use std::path::PathBuf;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::RetrievalConfig;
use crate::query::QueryVariant;
use crate::search::fusion::FusionStrategy;
use crate::search::types::{ScoredCandidate, Stage};

pub use engine::RetrievalEngine;

#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Re-chunk files even when their content hash is unchanged.
    pub force: bool,
    /// Rebuild the call graph after indexing.
    pub build_graph: bool,
    pub cancel: CancellationToken,
}

/// Per-call retrieval switches. Lexical scoring always runs.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrieveOptions {
    pub top_k: usize,
    /// Restrict results to one language, also used as the expansion hint.
    pub language: Option<String>,
    pub use_vector: bool,
    pub use_query_expansion: bool,
    pub use_feedback: bool,
    pub use_graph: bool,
    pub use_rerank: bool,
    pub fusion_strategy: FusionStrategy,
}

impl RetrieveOptions {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            language: None,
            use_vector: true,
            use_query_expansion: config.use_query_expansion,
            use_feedback: config.use_feedback_ranking,
            use_graph: config.use_graph_context,
            use_rerank: config.use_reranking,
            fusion_strategy: config.fusion_strategy,
        }
    }

    /// Only the lexical scorer.
    pub fn lexical_only(top_k: usize) -> Self {
        Self {
            top_k,
            language: None,
            use_vector: false,
            use_query_expansion: false,
            use_feedback: false,
            use_graph: false,
            use_rerank: false,
            fusion_strategy: FusionStrategy::default(),
        }
    }

    #[must_use]
    pub fn with_fusion(mut self, strategy: FusionStrategy) -> Self {
        self.fusion_strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    /// The collection holds no chunks yet.
    NotIndexed,
}

/// One ranked result with its chunk and score breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedItem {
    /// 1-based.
    pub rank: usize,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub language: String,
    pub symbol: Option<String>,
    pub content: String,
    /// Seed the chunk was reached from, for graph-expanded results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed_chunk_id: Option<String>,
    #[serde(flatten)]
    pub score: ScoredCandidate,
}

impl RetrievedItem {
    pub fn chunk_id(&self) -> &str {
        &self.score.chunk_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResponse {
    pub query: String,
    pub status: ResponseStatus,
    pub results: Vec<RetrievedItem>,
    /// Stages that ran, in pipeline order.
    pub stages: Vec<Stage>,
    /// Requested stages that could not run.
    pub degraded: Vec<Stage>,
    pub variants: Vec<QueryVariant>,
}

impl RetrievalResponse {
    fn not_indexed(query: &str) -> Self {
        Self {
            query: query.to_string(),
            status: ResponseStatus::NotIndexed,
            results: Vec::new(),
            stages: Vec::new(),
            degraded: Vec::new(),
            variants: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionStatus {
    pub collection: String,
    pub project_root: Option<PathBuf>,
    pub chunk_count: usize,
    pub file_count: usize,
    pub languages: Vec<String>,
    pub embedded_chunks: usize,
    pub graph_built: bool,
    pub graph_nodes: usize,
    pub graph_edges: usize,
    pub feedback_events: usize,
    pub rerank_model: Option<String>,
}
