use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use super::{
    CollectionStatus, IndexOptions, ResponseStatus, RetrievalResponse, RetrieveOptions, RetrievedItem,
};
use crate::capability::{Capability, with_retry};
use crate::config::Config;
use crate::db::SqliteStore;
use crate::embedder::{Embedder, EmbedderError};
use crate::error::{Error, Result};
use crate::feedback::{CleanupSummary, EventType, FeedbackEvent, FeedbackLearner};
use crate::graph::{CodeGraph, ExpandOptions, GraphBuilder, GraphHandle, GraphSummary, expand};
use crate::indexer::code_parser::CodeParser;
use crate::indexer::{IndexSummary, Indexer};
use crate::query::{QueryExpander, QueryVariant, canonical_language};
use crate::rerank::{RerankModel, Reranker};
use crate::search::fusion::{FusionParams, fuse, merge_variants};
use crate::search::types::{ScoredCandidate, Stage, sort_candidates};
use crate::search::{lexical_search, vector_search};
use crate::store::ChunkStore;
use crate::store::backend::{ChunkBackend, FeedbackBackend};
use crate::store::chunk::Chunk;

/// Logs each kind of degradation once per engine; repeats go to debug.
#[derive(Debug, Default)]
struct DegradationLog {
    vector: AtomicBool,
    graph: AtomicBool,
    rerank: AtomicBool,
}

impl DegradationLog {
    fn report(&self, stage: Stage, reason: &str) {
        let flag = match stage {
            Stage::Vector => &self.vector,
            Stage::Graph => &self.graph,
            Stage::Rerank => &self.rerank,
            _ => return,
        };
        if flag.swap(true, Ordering::Relaxed) {
            debug!("{stage} stage skipped: {reason}");
        } else {
            warn!("{stage} stage unavailable, continuing without it: {reason}");
        }
    }
}

fn validate_collection(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::malformed(format!(
            "invalid collection name '{name}': use letters, digits, '-' or '_'"
        )))
    }
}

/// Language filter in the form chunks store it.
fn language_filter(hint: Option<&str>) -> Option<String> {
    let hint = hint?.trim();
    if hint.is_empty() {
        return None;
    }
    Some(canonical_language(hint).map_or_else(|| hint.to_ascii_lowercase(), str::to_string))
}

/// Hybrid retrieval over one collection.
///
/// Owns the collection's chunk store, feedback learner and call graph. All
/// methods take `&self`; the engine is meant to be shared behind an `Arc`.
pub struct RetrievalEngine {
    config: Config,
    store: Arc<ChunkStore>,
    feedback: FeedbackLearner,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Reranker>,
    parser: Arc<CodeParser>,
    indexer: Indexer,
    expander: QueryExpander,
    graph: GraphHandle,
    degradation: DegradationLog,
}

impl RetrievalEngine {
    /// Open `collection` in the configured data directory.
    pub fn open(
        config: Config,
        collection: &str,
        embedder: Arc<dyn Embedder>,
        rerank_model: Option<Arc<dyn RerankModel>>,
    ) -> Result<Self> {
        validate_collection(collection)?;
        let backend = SqliteStore::open_collection(&config.data_dir(), collection)?;
        Self::with_backends(config, collection, backend.clone(), backend, embedder, rerank_model)
    }

    pub fn with_backends(
        config: Config,
        collection: &str,
        chunk_backend: Arc<dyn ChunkBackend>,
        feedback_backend: Arc<dyn FeedbackBackend>,
        embedder: Arc<dyn Embedder>,
        rerank_model: Option<Arc<dyn RerankModel>>,
    ) -> Result<Self> {
        validate_collection(collection)?;
        let retry = config.retry_policy();
        let store = Arc::new(ChunkStore::open(collection, chunk_backend, retry)?);
        let feedback = FeedbackLearner::open(feedback_backend, config.feedback.clone(), retry)?;
        let parser = Arc::new(CodeParser::new()?);
        let indexer = Indexer::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            Arc::clone(&parser),
            config.indexing.clone(),
            retry,
        );
        let reranker = rerank_model.map(|model| Reranker::new(model, retry));

        Ok(Self {
            config,
            store,
            feedback,
            embedder,
            reranker,
            parser,
            indexer,
            expander: QueryExpander::new(),
            graph: GraphHandle::new(),
            degradation: DegradationLog::default(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn collection(&self) -> &str {
        self.store.collection()
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn feedback(&self) -> &FeedbackLearner {
        &self.feedback
    }

    pub fn get_chunk(&self, chunk_id: &str) -> Option<Arc<Chunk>> {
        self.store.get(chunk_id)
    }

    /// Index `root`, then optionally rebuild the call graph. Without a
    /// rebuild, any change to the sources discards the current graph.
    pub async fn index(&self, root: &Path, options: IndexOptions) -> Result<IndexSummary> {
        let mut summary = self
            .indexer
            .index_directory(root, options.force, &options.cancel)
            .await?;
        if options.build_graph && !summary.cancelled {
            summary.graph = Some(self.build_graph(root).await?);
        } else if summary.files_indexed + summary.files_removed > 0 {
            debug!("Sources changed, dropping the call graph until it is rebuilt");
            self.graph.clear();
        }
        Ok(summary)
    }

    /// Parse `root` into a fresh call graph and publish it.
    pub async fn build_graph(&self, root: &Path) -> Result<GraphSummary> {
        let builder = GraphBuilder::new(
            Arc::clone(&self.parser),
            self.config.indexing.exclude.clone(),
            self.config.indexing.max_file_bytes,
        );
        let root = root.to_path_buf();
        let (graph, summary) = tokio::task::spawn_blocking(move || builder.build(&root))
            .await
            .map_err(|e| Error::Store(format!("graph build task failed: {e}")))??;
        self.graph.publish(graph);
        Ok(summary)
    }

    fn project_root(&self) -> Option<PathBuf> {
        match self.store.backend().project_root() {
            Ok(root) => root.map(PathBuf::from),
            Err(e) => {
                debug!("Cannot read project root: {e}");
                None
            }
        }
    }

    /// The current graph, built from the recorded project root on first use.
    async fn current_graph(&self) -> Option<Arc<CodeGraph>> {
        if let Some(graph) = self.graph.current() {
            return Some(graph);
        }
        let root = self.project_root()?;
        info!("Building call graph for {}", root.display());
        match self.build_graph(&root).await {
            Ok(_) => self.graph.current(),
            Err(e) => {
                warn!("Call graph build failed: {e}");
                None
            }
        }
    }

    /// One query vector per variant, each checked against the embedder's
    /// dimensionality.
    async fn embed_variants(
        &self,
        variants: &[QueryVariant],
        language: Option<&str>,
    ) -> Result<Capability<Vec<Vec<f32>>>> {
        let embedder = &self.embedder;
        let retry = self.config.retry_policy();
        let expected = embedder.dimensions();
        let mut vectors = Vec::with_capacity(variants.len());
        for variant in variants {
            let text = variant.text.as_str();
            let vector = with_retry(&retry, "embed query", move || async move {
                embedder.embed(text, language).await
            })
            .await?;
            match vector {
                Capability::Ready(v) if v.len() != expected => {
                    return Err(EmbedderError::DimensionMismatch {
                        expected,
                        actual: v.len(),
                    }
                    .into());
                }
                Capability::Ready(v) => vectors.push(v),
                Capability::Unavailable => return Ok(Capability::Unavailable),
            }
        }
        Ok(Capability::Ready(vectors))
    }

    /// Rank chunks of this collection for `query`.
    ///
    /// Lexical scoring always runs. Every other stage runs when requested and
    /// available; a requested stage that cannot run is listed in
    /// `degraded` instead of failing the call.
    pub async fn retrieve(&self, query: &str, options: &RetrieveOptions) -> Result<RetrievalResponse> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::malformed("query must not be empty"));
        }
        if options.top_k == 0 {
            return Err(Error::malformed("top_k must be positive"));
        }
        if self.store.is_empty() {
            return Ok(RetrievalResponse::not_indexed(query));
        }

        let r = &self.config.retrieval;
        let language = language_filter(options.language.as_deref());
        let language = language.as_deref();
        let mut stages = vec![Stage::Lexical];
        let mut degraded = Vec::new();

        let variants = if options.use_query_expansion {
            self.expander.expand(query, language, r.max_variants)
        } else {
            self.expander.expand(query, None, 1)
        };
        if variants.len() > 1 {
            stages.push(Stage::QueryExpansion);
        }

        let query_vectors = if options.use_vector {
            if self.store.read().embedded_len() == 0 {
                self.degradation.report(Stage::Vector, "no chunk has an embedding");
                None
            } else {
                match self.embed_variants(&variants, language).await {
                    Ok(Capability::Ready(vectors)) => Some(vectors),
                    Ok(Capability::Unavailable) => {
                        self.degradation.report(Stage::Vector, "embedder unavailable");
                        None
                    }
                    Err(e) => {
                        self.degradation.report(Stage::Vector, &e.to_string());
                        None
                    }
                }
            }
        } else {
            None
        };
        match &query_vectors {
            Some(_) => stages.push(Stage::Vector),
            None if options.use_vector => degraded.push(Stage::Vector),
            None => {}
        }

        let pool = r.candidate_pool.max(options.top_k);
        let (lexical, vector, expanded_hits) = {
            let index = self.store.read();
            let mut lexical_lists = Vec::with_capacity(variants.len());
            let mut vector_lists = Vec::new();
            let mut expanded_hits: HashSet<String> = HashSet::new();
            for (i, variant) in variants.iter().enumerate() {
                let lexical = lexical_search(&index, &variant.text, pool, language);
                let vector = query_vectors
                    .as_ref()
                    .and_then(|vectors| vectors.get(i))
                    .map(|v| vector_search(&index, v, pool, language))
                    .unwrap_or_default();
                if i > 0 {
                    expanded_hits.extend(lexical.iter().chain(&vector).map(|h| h.chunk_id.clone()));
                }
                lexical_lists.push(lexical);
                vector_lists.push(vector);
            }
            (
                merge_variants(lexical_lists),
                merge_variants(vector_lists),
                expanded_hits,
            )
        };

        let params = FusionParams {
            strategy: options.fusion_strategy,
            linear_alpha: r.linear_alpha,
            rrf_k: r.rrf_k,
        };
        let mut candidates: Vec<ScoredCandidate> = fuse(&lexical, &vector, &params)
            .iter()
            .map(|c| {
                if expanded_hits.contains(&c.chunk_id) {
                    c.with_stage(Stage::QueryExpansion)
                } else {
                    c.clone()
                }
            })
            .collect();
        debug!(
            "'{query}': {} lexical, {} vector, {} fused candidates over {} variants",
            lexical.len(),
            vector.len(),
            candidates.len(),
            variants.len()
        );

        if options.use_feedback {
            let boosts = self
                .feedback
                .boosts(query, candidates.iter().map(|c| c.chunk_id.as_str()));
            if !boosts.is_empty() {
                candidates = candidates
                    .iter()
                    .map(|c| match boosts.get(&c.chunk_id) {
                        Some(&boost) => c.with_boost(boost),
                        None => c.clone(),
                    })
                    .collect();
                stages.push(Stage::Feedback);
            }
        }
        sort_candidates(&mut candidates, r.rank_ordering);

        let mut seed_of: HashMap<String, String> = HashMap::new();
        if options.use_graph {
            match self.current_graph().await {
                Some(graph) => {
                    let added = self.expand_with_graph(&graph, &mut candidates, &mut seed_of, language);
                    debug!("Graph expansion added {added} candidates");
                    stages.push(Stage::Graph);
                    sort_candidates(&mut candidates, r.rank_ordering);
                }
                None => {
                    self.degradation.report(Stage::Graph, "no call graph and no known project root");
                    degraded.push(Stage::Graph);
                }
            }
        }

        if options.use_rerank {
            match &self.reranker {
                Some(reranker) => {
                    let top_n = r.rerank_top_n.min(candidates.len());
                    let chunks: HashMap<String, Arc<Chunk>> = {
                        let index = self.store.read();
                        candidates[..top_n]
                            .iter()
                            .filter_map(|c| index.get(&c.chunk_id).map(|ch| (c.chunk_id.clone(), Arc::clone(ch))))
                            .collect()
                    };
                    let outcome = reranker
                        .rerank(query, candidates, &chunks, top_n, r.rerank_beta)
                        .await;
                    candidates = outcome.candidates;
                    if outcome.applied {
                        stages.push(Stage::Rerank);
                        sort_candidates(&mut candidates, r.rank_ordering);
                    } else {
                        self.degradation
                            .report(Stage::Rerank, &format!("model {} did not score", reranker.model_name()));
                        degraded.push(Stage::Rerank);
                    }
                }
                None => {
                    self.degradation.report(Stage::Rerank, "no rerank model configured");
                    degraded.push(Stage::Rerank);
                }
            }
        }

        let results = {
            let index = self.store.read();
            candidates
                .into_iter()
                .filter_map(|score| index.get(&score.chunk_id).map(|chunk| (Arc::clone(chunk), score)))
                .take(options.top_k)
                .enumerate()
                .map(|(i, (chunk, score))| RetrievedItem {
                    rank: i + 1,
                    file_path: chunk.file_path.clone(),
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    language: chunk.language.clone(),
                    symbol: chunk.symbol.clone(),
                    content: chunk.content.clone(),
                    seed_chunk_id: seed_of.get(&score.chunk_id).cloned(),
                    score,
                })
                .collect()
        };

        Ok(RetrievalResponse {
            query: query.to_string(),
            status: ResponseStatus::Ok,
            results,
            stages,
            degraded,
            variants,
        })
    }

    /// Append graph neighbours of the top candidates. Each scores its seed's
    /// final score decayed once per edge.
    fn expand_with_graph(
        &self,
        graph: &CodeGraph,
        candidates: &mut Vec<ScoredCandidate>,
        seed_of: &mut HashMap<String, String>,
        language: Option<&str>,
    ) -> usize {
        let r = &self.config.retrieval;
        let seeds: Vec<String> = candidates
            .iter()
            .take(r.graph_seed_count)
            .map(|c| c.chunk_id.clone())
            .collect();
        let seed_scores: HashMap<String, f64> = candidates
            .iter()
            .take(r.graph_seed_count)
            .map(|c| (c.chunk_id.clone(), c.final_score))
            .collect();
        let options = ExpandOptions {
            depth: r.graph_depth,
            include_callers: r.include_callers,
            include_callees: r.include_callees,
        };
        let hits = {
            let index = self.store.read();
            expand(graph, &index, &seeds, options)
        };

        let existing: HashSet<String> = candidates.iter().map(|c| c.chunk_id.clone()).collect();
        let mut added = 0;
        for hit in hits {
            if existing.contains(&hit.chunk.chunk_id) {
                continue;
            }
            if language.is_some_and(|lang| !hit.chunk.language.eq_ignore_ascii_case(lang)) {
                continue;
            }
            let seed_score = seed_scores.get(&hit.seed_chunk_id).copied().unwrap_or(0.0);
            let depth = i32::try_from(hit.graph_depth).unwrap_or(i32::MAX);
            let score = seed_score * r.graph_decay.powi(depth);
            candidates.push(ScoredCandidate::graph_expanded(
                hit.chunk.chunk_id.clone(),
                hit.graph_depth,
                score,
            ));
            seed_of.insert(hit.chunk.chunk_id.clone(), hit.seed_chunk_id);
            added += 1;
        }
        added
    }

    /// Record one interaction with a result.
    pub async fn record_feedback(
        &self,
        query: &str,
        chunk_id: &str,
        event_type: EventType,
        observed_rank: Option<usize>,
    ) -> Result<()> {
        if query.trim().is_empty() {
            return Err(Error::malformed("feedback query must not be empty"));
        }
        if self.store.get(chunk_id).is_none() {
            return Err(Error::malformed(format!("unknown chunk_id '{chunk_id}'")));
        }
        self.feedback
            .record(FeedbackEvent::new(query, chunk_id, event_type, observed_rank))
            .await
    }

    /// Recorded events for `query` on `chunk_id`, oldest first.
    pub async fn feedback_history(&self, query: &str, chunk_id: &str) -> Result<Vec<FeedbackEvent>> {
        self.feedback.events(query, chunk_id).await
    }

    /// Fold feedback older than the retention horizon into aggregates.
    pub async fn cleanup_feedback(&self) -> Result<CleanupSummary> {
        self.feedback.cleanup().await
    }

    pub fn status(&self) -> CollectionStatus {
        let (chunk_count, file_count, languages, embedded_chunks) = {
            let index = self.store.read();
            (
                index.len(),
                index.files().len(),
                index.languages().into_iter().collect(),
                index.embedded_len(),
            )
        };
        let graph = self.graph.current();
        CollectionStatus {
            collection: self.collection().to_string(),
            project_root: self.project_root(),
            chunk_count,
            file_count,
            languages,
            embedded_chunks,
            graph_built: graph.is_some(),
            graph_nodes: graph.as_ref().map_or(0, |g| g.node_count()),
            graph_edges: graph.as_ref().map_or(0, |g| g.edge_count()),
            feedback_events: self.feedback.event_count(),
            rerank_model: self.reranker.as_ref().map(|r| r.model_name().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;
    use crate::rerank::TermOverlapModel;
    use crate::search::fusion::FusionStrategy;
    use crate::store::backend::FileRecord;
    use std::fs;
    use tempfile::tempdir;

    fn engine_with(embedder: MockEmbedder, rerank: Option<Arc<dyn RerankModel>>) -> RetrievalEngine {
        let backend = Arc::new(SqliteStore::open_in_memory().unwrap());
        let mut config = Config::default();
        config.capabilities.retry_backoff_ms = 0;
        RetrievalEngine::with_backends(
            config,
            "test",
            backend.clone(),
            backend,
            Arc::new(embedder),
            rerank,
        )
        .unwrap()
    }

    async fn seed(engine: &RetrievalEngine, files: &[(&str, &str)]) {
        let session = engine.store().begin_write().await;
        for (path, content) in files {
            let chunk = Chunk::new(path, 1, 1, "python", None, content.to_string());
            let record = FileRecord {
                path: path.to_string(),
                content_hash: path.to_string(),
                language: "python".to_string(),
            };
            session.replace_file(record, vec![chunk]).await.unwrap();
        }
    }

    #[test]
    fn test_validate_collection() {
        assert!(validate_collection("my-project_2").is_ok());
        assert!(validate_collection("").is_err());
        assert!(validate_collection("../etc").is_err());
        assert!(validate_collection("a b").is_err());
    }

    #[test]
    fn test_language_filter_canonicalizes() {
        assert_eq!(language_filter(Some("py")).as_deref(), Some("python"));
        assert_eq!(language_filter(Some("Java")).as_deref(), Some("java"));
        assert_eq!(language_filter(Some("  ")), None);
        assert_eq!(language_filter(None), None);
    }

    #[tokio::test]
    async fn test_empty_collection_is_not_indexed() {
        let engine = engine_with(MockEmbedder::default(), None);
        let response = engine
            .retrieve("anything", &RetrieveOptions::lexical_only(5))
            .await
            .unwrap();
        assert_eq!(response.status, ResponseStatus::NotIndexed);
        assert!(response.results.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_queries_rejected() {
        let engine = engine_with(MockEmbedder::default(), None);
        let err = engine
            .retrieve("   ", &RetrieveOptions::lexical_only(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
        let err = engine
            .retrieve("x", &RetrieveOptions::lexical_only(0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
    }

    #[tokio::test]
    async fn test_missing_capabilities_degrade() {
        let engine = engine_with(MockEmbedder::unavailable(), None);
        seed(&engine, &[("a.py", "def login(): pass"), ("b.py", "def logout(): pass")]).await;

        let options = RetrieveOptions {
            use_rerank: true,
            use_graph: true,
            ..RetrieveOptions::from_config(&engine.config().retrieval)
        };
        let response = engine.retrieve("login", &options).await.unwrap();
        assert_eq!(response.status, ResponseStatus::Ok);
        assert_eq!(response.results[0].file_path, "a.py");
        assert_eq!(response.degraded, vec![Stage::Vector, Stage::Graph, Stage::Rerank]);
        assert!(!response.stages.contains(&Stage::Vector));
        assert!(
            response
                .results
                .iter()
                .all(|item| !item.score.provenance.contains(&Stage::Vector))
        );
    }

    #[tokio::test]
    async fn test_rerank_stage_runs_with_model() {
        let engine = engine_with(MockEmbedder::default(), Some(Arc::new(TermOverlapModel)));
        seed(&engine, &[("a.py", "def login(): pass"), ("b.py", "login logout")]).await;
        let options = RetrieveOptions {
            use_rerank: true,
            ..RetrieveOptions::lexical_only(5)
        };
        let response = engine.retrieve("login", &options).await.unwrap();
        assert!(response.stages.contains(&Stage::Rerank));
        assert!(response.results.iter().all(|item| item.score.rerank_score.is_some()));
        assert_eq!(engine.status().rerank_model.as_deref(), Some("term-overlap"));
    }

    #[tokio::test]
    async fn test_record_feedback_validates_chunk() {
        let engine = engine_with(MockEmbedder::default(), None);
        seed(&engine, &[("a.py", "def login(): pass")]).await;
        let err = engine
            .record_feedback("login", "feedfeedfeedfeed", EventType::Click, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));

        let chunk_id = engine.store().scan().next().unwrap().chunk_id.clone();
        engine
            .record_feedback("login", &chunk_id, EventType::Useful, Some(1))
            .await
            .unwrap();
        assert_eq!(engine.status().feedback_events, 1);
    }

    #[tokio::test]
    async fn test_fusion_strategy_is_chosen_per_call() {
        let engine = engine_with(MockEmbedder::default(), None);
        seed(&engine, &[("a.py", "def login(): pass"), ("b.py", "login logout")]).await;

        let rrf = engine
            .retrieve("login", &RetrieveOptions::lexical_only(5).with_fusion(FusionStrategy::Rrf))
            .await
            .unwrap();
        let scores: Vec<f64> = rrf.results.iter().map(|item| item.score.fused_score).collect();
        assert_eq!(scores.len(), 2);
        assert!((scores[0] - 1.0 / 61.0).abs() < 1e-12, "{scores:?}");
        assert!((scores[1] - 1.0 / 62.0).abs() < 1e-12, "{scores:?}");

        let max = engine
            .retrieve("login", &RetrieveOptions::lexical_only(5).with_fusion(FusionStrategy::Max))
            .await
            .unwrap();
        assert_eq!(max.results.len(), 2);
        assert!((max.results[0].score.fused_score - 1.0).abs() < 1e-12);
        assert!(max.results.iter().all(|item| item.score.provenance.contains(&Stage::Lexical)));
    }

    #[tokio::test]
    async fn test_feedback_stage_listed_only_when_a_boost_applies() {
        let engine = engine_with(MockEmbedder::default(), None);
        seed(&engine, &[("a.py", "def login(): pass"), ("b.py", "login logout")]).await;
        let options = RetrieveOptions {
            use_feedback: true,
            ..RetrieveOptions::lexical_only(5)
        };

        let response = engine.retrieve("login", &options).await.unwrap();
        assert!(!response.stages.contains(&Stage::Feedback));

        let chunk_id = response.results[1].chunk_id().to_string();
        for _ in 0..3 {
            engine
                .record_feedback("login", &chunk_id, EventType::Useful, Some(2))
                .await
                .unwrap();
        }
        let response = engine.retrieve("login", &options).await.unwrap();
        assert!(response.stages.contains(&Stage::Feedback));
        let boosted = response.results.iter().find(|item| item.chunk_id() == chunk_id).unwrap();
        assert!(boosted.score.feedback_boost > 0.0);
        assert!(boosted.score.provenance.contains(&Stage::Feedback));

        let history = engine.feedback_history(" LOGIN ", &chunk_id).await.unwrap();
        assert_eq!(history.len(), 3);
    }

    /// Fails the first call, then returns vectors of `produced` length while
    /// claiming `claimed` dimensions.
    struct UnsteadyEmbedder {
        claimed: usize,
        produced: usize,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Embedder for UnsteadyEmbedder {
        async fn embed(
            &self,
            _text: &str,
            _language: Option<&str>,
        ) -> std::result::Result<Capability<Vec<f32>>, EmbedderError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(EmbedderError::InferenceFailed("warming up".to_string()));
            }
            Ok(Capability::Ready(vec![0.5; self.produced]))
        }

        fn dimensions(&self) -> usize {
            self.claimed
        }
    }

    async fn engine_with_vectors(claimed: usize, produced: usize) -> RetrievalEngine {
        let backend = Arc::new(SqliteStore::open_in_memory().unwrap());
        let mut config = Config::default();
        config.capabilities.retry_backoff_ms = 0;
        let embedder = UnsteadyEmbedder {
            claimed,
            produced,
            calls: std::sync::atomic::AtomicUsize::new(0),
        };
        let engine = RetrievalEngine::with_backends(config, "test", backend.clone(), backend, Arc::new(embedder), None)
            .unwrap();
        let session = engine.store().begin_write().await;
        let chunk = Chunk::new("a.py", 1, 1, "python", None, "def login(): pass".to_string())
            .with_embedding(Some(vec![0.5; claimed]));
        let record = FileRecord {
            path: "a.py".to_string(),
            content_hash: "a".to_string(),
            language: "python".to_string(),
        };
        session.replace_file(record, vec![chunk]).await.unwrap();
        drop(session);
        engine
    }

    #[tokio::test]
    async fn test_query_embedding_retried_once() {
        let engine = engine_with_vectors(8, 8).await;
        let options = RetrieveOptions {
            use_vector: true,
            ..RetrieveOptions::lexical_only(5)
        };
        let response = engine.retrieve("login", &options).await.unwrap();
        assert!(response.stages.contains(&Stage::Vector));
        assert!(response.degraded.is_empty());
    }

    #[tokio::test]
    async fn test_query_vector_of_wrong_width_degrades() {
        let engine = engine_with_vectors(8, 4).await;
        let options = RetrieveOptions {
            use_vector: true,
            ..RetrieveOptions::lexical_only(5)
        };
        let response = engine.retrieve("login", &options).await.unwrap();
        assert_eq!(response.degraded, vec![Stage::Vector]);
        assert_eq!(response.results.len(), 1);
        assert!(!response.results[0].score.provenance.contains(&Stage::Vector));
    }

    #[tokio::test]
    async fn test_index_with_graph_and_status() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("auth.py"),
            "def login(u, p):\n    return hash_password(p)\n\ndef hash_password(p):\n    return p\n",
        )
        .unwrap();
        let engine = engine_with(MockEmbedder::default(), None);
        let summary = engine
            .index(
                dir.path(),
                IndexOptions {
                    build_graph: true,
                    ..IndexOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(summary.graph.as_ref().map(|g| g.edge_count), Some(1));

        let status = engine.status();
        assert_eq!(status.chunk_count, 2);
        assert_eq!(status.embedded_chunks, 2);
        assert!(status.graph_built);
        assert_eq!(status.languages, vec!["python".to_string()]);
        assert!(status.project_root.is_some());
    }
}
