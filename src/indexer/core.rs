use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::chunker::{WindowOptions, chunk_source};
use super::code_parser::CodeParser;
use super::languages::detect_language;
use super::walker::{FileContent, WalkEntry, content_hash, read_source, walk_project};
use crate::capability::{Capability, RetryPolicy, with_retry};
use crate::config::IndexingConfig;
use crate::embedder::Embedder;
use crate::error::{Error, Result};
use crate::graph::GraphSummary;
use crate::store::ChunkStore;
use crate::store::backend::FileRecord;
use crate::store::chunk::Chunk;

/// Files handed to the worker pool per round; cancellation is also checked
/// between rounds.
const PREPARE_BATCH: usize = 64;

/// A file that could not be indexed. The rest of the run continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexFailure {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    /// Chunks in the collection after the run.
    pub chunk_count: usize,
    /// Files in the collection after the run.
    pub file_count: usize,
    pub languages: Vec<String>,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_removed: usize,
    pub skipped_binary: usize,
    pub skipped_oversized: usize,
    pub failures: Vec<IndexFailure>,
    pub cancelled: bool,
    /// Set when the run also rebuilt the call graph.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<GraphSummary>,
}

/// Outcome of reading, hashing and chunking one file on the worker pool.
enum Prepared {
    Unchanged,
    Binary,
    Oversized,
    Failed(String),
    Ready { record: FileRecord, chunks: Vec<Chunk> },
}

fn prepare_file(
    entry: &WalkEntry,
    known_hash: Option<&str>,
    force: bool,
    parser: &CodeParser,
    config: &IndexingConfig,
) -> Prepared {
    let content = match read_source(entry, config.max_file_bytes) {
        Ok(FileContent::Text(text)) => text,
        Ok(FileContent::Binary) => return Prepared::Binary,
        Ok(FileContent::Oversized) => return Prepared::Oversized,
        Err(e) => return Prepared::Failed(e.to_string()),
    };

    let hash = content_hash(&content);
    if !force && known_hash == Some(hash.as_str()) {
        return Prepared::Unchanged;
    }

    let language = detect_language(Path::new(&entry.rel_path));
    let parsed = match parser.parse(&content, language) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("Falling back to line windows for {}: {e}", entry.rel_path);
            None
        }
    };
    let window = WindowOptions {
        lines: config.window_lines,
        overlap: config.window_overlap,
    };
    let chunks = chunk_source(&entry.rel_path, language, &content, parsed.as_ref(), window);

    Prepared::Ready {
        record: FileRecord {
            path: entry.rel_path.clone(),
            content_hash: hash,
            language: language.to_string(),
        },
        chunks,
    }
}

/// Walks a project, chunks changed files and publishes them into a
/// [`ChunkStore`].
pub struct Indexer {
    store: Arc<ChunkStore>,
    embedder: Arc<dyn Embedder>,
    parser: Arc<CodeParser>,
    config: IndexingConfig,
    retry: RetryPolicy,
}

impl Indexer {
    pub fn new(
        store: Arc<ChunkStore>,
        embedder: Arc<dyn Embedder>,
        parser: Arc<CodeParser>,
        config: IndexingConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            embedder,
            parser,
            config,
            retry,
        }
    }

    /// Index every file under `root` with differential sync.
    ///
    /// Files whose content hash is unchanged are skipped unless `force`;
    /// files that disappeared are removed unless the run was cancelled.
    /// Only one run per store proceeds at a time.
    pub async fn index_directory(
        &self,
        root: &Path,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<IndexSummary> {
        if !root.is_dir() {
            return Err(Error::malformed(format!(
                "project root is not a directory: {}",
                root.display()
            )));
        }
        let root = root.canonicalize()?;

        let session = self.store.begin_write().await;
        let known = self.store.file_hashes();

        let walk_root = root.clone();
        let exclude = self.config.exclude.clone();
        let entries = tokio::task::spawn_blocking(move || walk_project(&walk_root, &exclude))
            .await
            .map_err(|e| Error::Store(format!("walk task failed: {e}")))??;
        info!("Found {} candidate files under {}", entries.len(), root.display());

        let mut summary = IndexSummary {
            cancelled: cancel.is_cancelled(),
            ..IndexSummary::default()
        };
        let mut present: HashSet<String> = HashSet::new();
        let mut embeddings_enabled = true;
        let entries = Arc::new(entries);

        'rounds: for start in (0..entries.len()).step_by(PREPARE_BATCH) {
            if summary.cancelled || cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let end = (start + PREPARE_BATCH).min(entries.len());
            let prepared = self.prepare_round(&entries, start..end, &known, force).await?;

            for (entry, outcome) in entries[start..end].iter().zip(prepared) {
                if cancel.is_cancelled() {
                    summary.cancelled = true;
                    break 'rounds;
                }
                match outcome {
                    Prepared::Unchanged => {
                        present.insert(entry.rel_path.clone());
                        summary.files_unchanged += 1;
                    }
                    Prepared::Binary => summary.skipped_binary += 1,
                    Prepared::Oversized => summary.skipped_oversized += 1,
                    Prepared::Failed(reason) => {
                        warn!("Failed to index {}: {reason}", entry.rel_path);
                        present.insert(entry.rel_path.clone());
                        summary.failures.push(IndexFailure {
                            path: entry.rel_path.clone(),
                            reason,
                        });
                    }
                    Prepared::Ready { record, chunks } => {
                        present.insert(entry.rel_path.clone());
                        let chunks = self
                            .embed_chunks(chunks, &record.language, &mut embeddings_enabled)
                            .await;
                        let path = record.path.clone();
                        match session.replace_file(record, chunks).await {
                            Ok(()) => summary.files_indexed += 1,
                            Err(e) => {
                                warn!("Failed to store {path}: {e}");
                                summary.failures.push(IndexFailure {
                                    path,
                                    reason: e.to_string(),
                                });
                            }
                        }
                    }
                }
            }
        }

        if !summary.cancelled {
            let mut stale: Vec<&String> = known.keys().filter(|p| !present.contains(*p)).collect();
            stale.sort();
            for path in stale {
                match session.remove_file(path).await {
                    Ok(true) => summary.files_removed += 1,
                    Ok(false) => {}
                    Err(e) => summary.failures.push(IndexFailure {
                        path: path.clone(),
                        reason: e.to_string(),
                    }),
                }
            }
            session.set_project_root(&root.to_string_lossy())?;
        }
        drop(session);

        summary.chunk_count = self.store.len();
        summary.file_count = self.store.file_count();
        summary.languages = self.store.languages().into_iter().collect();

        info!(
            "Indexed {} files ({} unchanged, {} removed, {} failed) in {}; {} chunks total{}",
            summary.files_indexed,
            summary.files_unchanged,
            summary.files_removed,
            summary.failures.len(),
            self.store.collection(),
            summary.chunk_count,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        Ok(summary)
    }

    /// Read, hash and chunk `entries[range]` on the rayon pool.
    async fn prepare_round(
        &self,
        entries: &Arc<Vec<WalkEntry>>,
        range: std::ops::Range<usize>,
        known: &HashMap<String, String>,
        force: bool,
    ) -> Result<Vec<Prepared>> {
        let hashes: Vec<Option<String>> = entries[range.clone()]
            .iter()
            .map(|e| known.get(&e.rel_path).cloned())
            .collect();
        let entries = Arc::clone(entries);
        let parser = Arc::clone(&self.parser);
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || {
            entries[range]
                .par_iter()
                .zip(hashes.par_iter())
                .map(|(entry, hash)| prepare_file(entry, hash.as_deref(), force, &parser, &config))
                .collect()
        })
        .await
        .map_err(|e| Error::Store(format!("chunking task failed: {e}")))
    }

    /// Attach embeddings to `chunks`. Once the embedder reports that it is
    /// unavailable, `enabled` is cleared and the rest of the run stores chunks
    /// without embeddings.
    async fn embed_chunks(&self, mut chunks: Vec<Chunk>, language: &str, enabled: &mut bool) -> Vec<Chunk> {
        if !*enabled || chunks.is_empty() {
            return chunks;
        }
        let batch_size = self.config.embed_batch_size.max(1);
        for batch in chunks.chunks_mut(batch_size) {
            let texts: Vec<String> = batch.iter().map(Chunk::embedding_text).collect();
            match self.embed_texts(&texts, language).await {
                Ok(Capability::Ready(vectors)) if vectors.len() == batch.len() => {
                    for (chunk, vector) in batch.iter_mut().zip(vectors) {
                        chunk.embedding = Some(vector);
                    }
                }
                Ok(Capability::Ready(vectors)) => {
                    warn!("Embedder returned {} vectors for {} texts", vectors.len(), batch.len());
                }
                Ok(Capability::Unavailable) => {
                    warn!("Embedder unavailable, indexing without vectors");
                    *enabled = false;
                    break;
                }
                Err(e) => warn!("Embedding failed after retry, storing chunks without vectors: {e}"),
            }
        }
        chunks
    }

    async fn embed_texts(
        &self,
        texts: &[String],
        language: &str,
    ) -> std::result::Result<Capability<Vec<Vec<f32>>>, crate::embedder::EmbedderError> {
        let embedder = &self.embedder;
        if self.config.use_code_embeddings {
            let mut vectors = Vec::with_capacity(texts.len());
            for text in texts {
                let text = text.as_str();
                let result = with_retry(&self.retry, "embed code", move || async move {
                    embedder.embed_code(text, language).await
                })
                .await?;
                match result {
                    Capability::Ready(v) => vectors.push(v),
                    Capability::Unavailable => break,
                }
            }
            if vectors.len() == texts.len() {
                return Ok(Capability::Ready(vectors));
            }
            debug!("Code embeddings unavailable, using text embeddings");
        }
        with_retry(&self.retry, "embed batch", move || async move {
            embedder.embed_batch(texts, Some(language)).await
        })
        .await
    }
}
