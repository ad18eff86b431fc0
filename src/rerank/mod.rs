/// Optional joint query/document re-scoring of the top fused candidates.
///
/// The relevance model is a capability like the embedder: a model that is not
/// installed answers [`Capability::Unavailable`], and the stage turns into a
/// passthrough that reports it did not run.
pub mod model;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, warn};

use crate::capability::{Capability, RetryPolicy, with_retry};
use crate::search::types::{ScoredCandidate, sanitize};
use crate::store::chunk::Chunk;

pub use model::TermOverlapModel;

#[derive(Error, Debug)]
pub enum RerankError {
    #[error("scoring failed: {0}")]
    ScoringFailed(String),
}

/// Scores how well `document` answers `query`, higher is better.
#[async_trait]
pub trait RerankModel: Send + Sync {
    async fn score(&self, query: &str, document: &str) -> Result<Capability<f32>, RerankError>;

    fn name(&self) -> &str;
}

/// Candidates after the rerank stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RerankOutcome {
    pub candidates: Vec<ScoredCandidate>,
    /// False when the stage was skipped and `candidates` are unchanged.
    pub applied: bool,
}

impl RerankOutcome {
    fn passthrough(candidates: Vec<ScoredCandidate>) -> Self {
        Self {
            candidates,
            applied: false,
        }
    }
}

fn document_text(chunk: &Chunk) -> String {
    match &chunk.symbol {
        Some(symbol) => format!("{} {symbol}\n{}", chunk.file_path, chunk.content),
        None => format!("{}\n{}", chunk.file_path, chunk.content),
    }
}

pub struct Reranker {
    model: Arc<dyn RerankModel>,
    retry: RetryPolicy,
}

impl Reranker {
    pub fn new(model: Arc<dyn RerankModel>, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Score the first `top_n` of `candidates` (already in rank order) and
    /// blend the model score into their final score with weight `beta`.
    ///
    /// All-or-nothing: if the model is unavailable or any call still fails
    /// after its retry, every candidate comes back unchanged.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<ScoredCandidate>,
        chunks: &HashMap<String, Arc<Chunk>>,
        top_n: usize,
        beta: f64,
    ) -> RerankOutcome {
        let n = top_n.min(candidates.len());
        if n == 0 {
            return RerankOutcome::passthrough(candidates);
        }

        let mut documents = Vec::with_capacity(n);
        for candidate in &candidates[..n] {
            match chunks.get(&candidate.chunk_id) {
                Some(chunk) => documents.push(document_text(chunk)),
                None => {
                    debug!("No chunk for {}, skipping rerank", candidate.chunk_id);
                    return RerankOutcome::passthrough(candidates);
                }
            }
        }

        let model = &self.model;
        let retry = &self.retry;
        let calls = documents.iter().map(|doc| {
            let doc = doc.as_str();
            with_retry(retry, "rerank score", move || async move { model.score(query, doc).await })
        });
        let results = join_all(calls).await;

        let mut scores = Vec::with_capacity(n);
        for result in results {
            match result {
                Ok(Capability::Ready(score)) => scores.push(sanitize(f64::from(score))),
                Ok(Capability::Unavailable) => {
                    debug!("Rerank model {} unavailable", self.model.name());
                    return RerankOutcome::passthrough(candidates);
                }
                Err(e) => {
                    warn!("Rerank model {} failed after retry: {e}", self.model.name());
                    return RerankOutcome::passthrough(candidates);
                }
            }
        }

        let reranked = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| match scores.get(i) {
                Some(&score) => c.with_rerank(score, beta),
                None => c.clone(),
            })
            .collect();
        RerankOutcome {
            candidates: reranked,
            applied: true,
        }
    }
}
