//! In-memory chunk store for one collection, written through to a
//! [`ChunkBackend`].
//!
//! Reads take a short `parking_lot` read lock; writes go through a
//! [`WriteSession`], which holds the store's async write gate so only one
//! indexing run mutates a collection at a time. A file's chunks are persisted
//! first and then swapped in under a single write lock, so a reader sees either
//! the old or the new version of a file, never a mix.
pub mod backend;
pub mod chunk;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use tokio::sync::{Mutex as TokioMutex, MutexGuard};
use tracing::{debug, info};

use crate::capability::{RetryPolicy, with_retry};
use crate::error::Result;
use backend::{ChunkBackend, FileRecord};
use chunk::Chunk;

/// Per-file bookkeeping kept next to the chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub content_hash: String,
    pub language: String,
    pub chunk_ids: Vec<String>,
}

/// Chunks plus the inverted index the lexical scorer reads.
#[derive(Debug, Default)]
pub struct ChunkIndex {
    chunks: BTreeMap<String, Arc<Chunk>>,
    files: BTreeMap<String, FileEntry>,
    postings: HashMap<String, BTreeMap<String, u32>>,
    total_tokens: u64,
    embedded: usize,
}

impl ChunkIndex {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunks carrying an embedding.
    pub fn embedded_len(&self) -> usize {
        self.embedded
    }

    pub fn get(&self, chunk_id: &str) -> Option<&Arc<Chunk>> {
        self.chunks.get(chunk_id)
    }

    /// All chunks in `chunk_id` order.
    pub fn chunks(&self) -> impl Iterator<Item = &Arc<Chunk>> {
        self.chunks.values()
    }

    /// Chunk id → term frequency for `term`.
    pub fn postings(&self, term: &str) -> Option<&BTreeMap<String, u32>> {
        self.postings.get(term)
    }

    pub fn avg_chunk_tokens(&self) -> f64 {
        if self.chunks.is_empty() {
            0.0
        } else {
            self.total_tokens as f64 / self.chunks.len() as f64
        }
    }

    pub fn files(&self) -> &BTreeMap<String, FileEntry> {
        &self.files
    }

    pub fn languages(&self) -> BTreeSet<String> {
        self.files.values().map(|f| f.language.clone()).collect()
    }

    pub fn chunks_in_file(&self, path: &str) -> Vec<&Arc<Chunk>> {
        self.files
            .get(path)
            .map(|f| f.chunk_ids.iter().filter_map(|id| self.chunks.get(id)).collect())
            .unwrap_or_default()
    }

    /// Narrowest chunk of `path` whose range contains `line`.
    pub fn chunk_covering(&self, path: &str, line: usize) -> Option<&Arc<Chunk>> {
        self.chunks_in_file(path)
            .into_iter()
            .filter(|c| c.contains_line(line))
            .min_by(|a, b| {
                a.line_span()
                    .cmp(&b.line_span())
                    .then_with(|| a.start_line.cmp(&b.start_line))
            })
    }

    fn insert_chunk(&mut self, chunk: Arc<Chunk>) {
        for (term, tf) in &chunk.token_postings {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(chunk.chunk_id.clone(), *tf);
        }
        self.total_tokens += u64::from(chunk.token_count);
        if chunk.embedding.is_some() {
            self.embedded += 1;
        }
        self.chunks.insert(chunk.chunk_id.clone(), chunk);
    }

    fn remove_chunk(&mut self, chunk_id: &str) {
        let Some(chunk) = self.chunks.remove(chunk_id) else {
            return;
        };
        for term in chunk.token_postings.keys() {
            if let Some(list) = self.postings.get_mut(term) {
                list.remove(chunk_id);
                if list.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
        self.total_tokens = self.total_tokens.saturating_sub(u64::from(chunk.token_count));
        if chunk.embedding.is_some() {
            self.embedded -= 1;
        }
    }

    fn replace_file(&mut self, record: FileRecord, chunks: Vec<Chunk>) {
        self.remove_file(&record.path);
        let mut chunk_ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if self.chunks.contains_key(&chunk.chunk_id) {
                continue;
            }
            chunk_ids.push(chunk.chunk_id.clone());
            self.insert_chunk(Arc::new(chunk));
        }
        self.files.insert(
            record.path,
            FileEntry {
                content_hash: record.content_hash,
                language: record.language,
                chunk_ids,
            },
        );
    }

    fn remove_file(&mut self, path: &str) -> bool {
        match self.files.remove(path) {
            Some(entry) => {
                for id in &entry.chunk_ids {
                    self.remove_chunk(id);
                }
                true
            }
            None => false,
        }
    }
}

/// Restartable iterator over a consistent snapshot of the store.
#[derive(Debug, Clone)]
pub struct ChunkScan {
    snapshot: Arc<Vec<Arc<Chunk>>>,
    pos: usize,
}

impl ChunkScan {
    /// Rewind to the first chunk of the same snapshot.
    pub fn restart(&mut self) {
        self.pos = 0;
    }
}

impl Iterator for ChunkScan {
    type Item = Arc<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.snapshot.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.snapshot.len() - self.pos;
        (left, Some(left))
    }
}

/// Chunk store for one collection.
pub struct ChunkStore {
    collection: String,
    index: RwLock<ChunkIndex>,
    backend: Arc<dyn ChunkBackend>,
    write_gate: TokioMutex<()>,
    retry: RetryPolicy,
}

impl ChunkStore {
    /// Open the store and load every persisted chunk into memory.
    pub fn open(
        collection: &str,
        backend: Arc<dyn ChunkBackend>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let files = backend.load_files()?;
        let chunks = backend.load_chunks()?;

        let mut by_file: HashMap<String, Vec<Chunk>> = HashMap::new();
        for chunk in chunks {
            by_file.entry(chunk.file_path.clone()).or_default().push(chunk);
        }

        let mut index = ChunkIndex::default();
        for record in files {
            let chunks = by_file.remove(&record.path).unwrap_or_default();
            index.replace_file(record, chunks);
        }
        info!(
            "Loaded collection {collection}: {} chunks in {} files",
            index.len(),
            index.files.len()
        );

        Ok(Self {
            collection: collection.to_string(),
            index: RwLock::new(index),
            backend,
            write_gate: TokioMutex::new(()),
            retry,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn backend(&self) -> &Arc<dyn ChunkBackend> {
        &self.backend
    }

    pub fn get(&self, chunk_id: &str) -> Option<Arc<Chunk>> {
        self.index.read().get(chunk_id).cloned()
    }

    /// Snapshot every chunk; the returned scan can be restarted.
    pub fn scan(&self) -> ChunkScan {
        let snapshot: Vec<Arc<Chunk>> = self.index.read().chunks().cloned().collect();
        ChunkScan {
            snapshot: Arc::new(snapshot),
            pos: 0,
        }
    }

    /// Read access for scorers. Do not hold the guard across an `.await`.
    pub fn read(&self) -> RwLockReadGuard<'_, ChunkIndex> {
        self.index.read()
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.index.read().files.len()
    }

    pub fn languages(&self) -> BTreeSet<String> {
        self.index.read().languages()
    }

    /// Path → content hash for every indexed file.
    pub fn file_hashes(&self) -> HashMap<String, String> {
        self.index
            .read()
            .files
            .iter()
            .map(|(path, f)| (path.clone(), f.content_hash.clone()))
            .collect()
    }

    /// Wait for exclusive write access to this collection.
    pub async fn begin_write(&self) -> WriteSession<'_> {
        WriteSession {
            _guard: self.write_gate.lock().await,
            store: self,
        }
    }
}

/// Exclusive write access to a [`ChunkStore`].
pub struct WriteSession<'a> {
    _guard: MutexGuard<'a, ()>,
    store: &'a ChunkStore,
}

impl WriteSession<'_> {
    /// Persist and publish the new chunk set of one file.
    pub async fn replace_file(&self, record: FileRecord, chunks: Vec<Chunk>) -> Result<()> {
        let backend = &self.store.backend;
        let (rec, list) = (&record, chunks.as_slice());
        with_retry(&self.store.retry, "persist chunks", move || async move {
            backend.persist_file(rec, list)
        })
        .await?;

        debug!("Publishing {} chunks for {}", chunks.len(), record.path);
        self.store.index.write().replace_file(record, chunks);
        Ok(())
    }

    /// Delete one file from the backend and the in-memory index.
    pub async fn remove_file(&self, path: &str) -> Result<bool> {
        let backend = &self.store.backend;
        let removed = with_retry(&self.store.retry, "remove file", move || async move {
            backend.remove_file(path)
        })
        .await?;
        let was_indexed = self.store.index.write().remove_file(path);
        Ok(removed || was_indexed)
    }

    pub fn set_project_root(&self, root: &str) -> Result<()> {
        self.store.backend.set_project_root(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;

    fn store() -> ChunkStore {
        let backend = Arc::new(SqliteStore::open_in_memory().unwrap());
        ChunkStore::open("test", backend, RetryPolicy::immediate()).unwrap()
    }

    fn record(path: &str, hash: &str) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            content_hash: hash.to_string(),
            language: "python".to_string(),
        }
    }

    #[tokio::test]
    async fn test_replace_file_updates_postings() {
        let store = store();
        let session = store.begin_write().await;
        let c1 = Chunk::new("a.py", 1, 2, "python", None, "def login(): pass".into());
        let id1 = c1.chunk_id.clone();
        session.replace_file(record("a.py", "h1"), vec![c1]).await.unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.read().postings("login").unwrap().contains_key(&id1));

        let c2 = Chunk::new("a.py", 1, 3, "python", None, "def logout(): pass".into());
        session.replace_file(record("a.py", "h2"), vec![c2]).await.unwrap();

        let index = store.read();
        assert_eq!(index.len(), 1);
        assert!(index.postings("login").is_none());
        assert!(index.get(&id1).is_none());
        assert_eq!(index.files()["a.py"].content_hash, "h2");
    }

    #[tokio::test]
    async fn test_remove_file() {
        let store = store();
        let session = store.begin_write().await;
        let chunk = Chunk::new("b.py", 1, 1, "python", None, "x = 1".into());
        session.replace_file(record("b.py", "h"), vec![chunk]).await.unwrap();
        assert!(session.remove_file("b.py").await.unwrap());
        assert!(store.is_empty());
        assert_eq!(store.read().avg_chunk_tokens(), 0.0);
    }

    #[tokio::test]
    async fn test_scan_is_restartable_snapshot() {
        let store = store();
        {
            let session = store.begin_write().await;
            let chunks = vec![
                Chunk::new("c.py", 1, 1, "python", None, "a".into()),
                Chunk::new("c.py", 2, 2, "python", None, "b".into()),
            ];
            session.replace_file(record("c.py", "h"), chunks).await.unwrap();
        }
        let mut scan = store.scan();
        assert_eq!(scan.by_ref().count(), 2);
        assert_eq!(scan.next(), None);
        scan.restart();
        assert_eq!(scan.count(), 2);
    }

    #[tokio::test]
    async fn test_reopen_loads_persisted_chunks() {
        let backend = Arc::new(SqliteStore::open_in_memory().unwrap());
        {
            let store = ChunkStore::open("t", backend.clone(), RetryPolicy::immediate()).unwrap();
            let session = store.begin_write().await;
            let chunk = Chunk::new("d.py", 1, 4, "python", Some("f".into()), "def f(): return 1".into())
                .with_embedding(Some(vec![0.5, -0.5]));
            session.replace_file(record("d.py", "h"), vec![chunk]).await.unwrap();
        }
        let reopened = ChunkStore::open("t", backend, RetryPolicy::immediate()).unwrap();
        let chunk = reopened.scan().next().unwrap();
        assert_eq!(chunk.symbol.as_deref(), Some("f"));
        assert_eq!(chunk.embedding.as_deref(), Some(&[0.5f32, -0.5][..]));
        assert_eq!(chunk.token_postings.get("return"), Some(&1));
    }

    #[test]
    fn test_chunk_covering_prefers_narrowest() {
        let mut index = ChunkIndex::default();
        let class = Chunk::new("e.py", 1, 10, "python", None, "class A".into());
        let method = Chunk::new("e.py", 3, 5, "python", None, "def m".into());
        let method_id = method.chunk_id.clone();
        index.replace_file(record("e.py", "h"), vec![class, method]);
        assert_eq!(index.chunk_covering("e.py", 4).unwrap().chunk_id, method_id);
        assert_eq!(index.chunk_covering("e.py", 8).unwrap().start_line, 1);
        assert!(index.chunk_covering("e.py", 11).is_none());
    }
}
