//! Persistence capabilities the in-memory stores write through to.
//!
//! Both traits are synchronous: the SQLite implementation in [`crate::db`]
//! holds a connection behind a mutex, so every call is one short critical
//! section.
use chrono::{DateTime, Utc};

use super::chunk::Chunk;
use crate::error::Result;
use crate::feedback::{FeedbackAggregate, FeedbackEvent};

/// One indexed file as recorded by the backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub content_hash: String,
    pub language: String,
}

/// Chunk persistence for one collection.
pub trait ChunkBackend: Send + Sync {
    /// Replace every chunk of `file` atomically.
    fn persist_file(&self, file: &FileRecord, chunks: &[Chunk]) -> Result<()>;

    /// Delete a file and its chunks. Returns whether the file existed.
    fn remove_file(&self, path: &str) -> Result<bool>;

    fn load_files(&self) -> Result<Vec<FileRecord>>;

    fn load_chunks(&self) -> Result<Vec<Chunk>>;

    fn set_project_root(&self, root: &str) -> Result<()>;

    fn project_root(&self) -> Result<Option<String>>;
}

/// Feedback persistence for one collection.
pub trait FeedbackBackend: Send + Sync {
    fn persist_feedback(&self, event: &FeedbackEvent) -> Result<()>;

    /// Events recorded for one normalized query and chunk.
    fn load_feedback(&self, query_key: &str, chunk_id: &str) -> Result<Vec<FeedbackEvent>>;

    fn load_all_feedback(&self) -> Result<Vec<FeedbackEvent>>;

    fn load_aggregates(&self) -> Result<Vec<FeedbackAggregate>>;

    /// Store `aggregates` and delete every event older than `cutoff`, in one
    /// transaction. Returns the number of deleted events.
    fn roll_up(&self, aggregates: &[FeedbackAggregate], cutoff: DateTime<Utc>) -> Result<usize>;
}
