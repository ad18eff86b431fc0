//! SQLite persistence for chunks, feedback and collection metadata.
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, Result};
use tracing::info;

use crate::feedback::{FeedbackAggregate, FeedbackEvent};
use crate::store::backend::{ChunkBackend, FeedbackBackend, FileRecord};
use crate::store::chunk::Chunk;

pub mod chunks;
pub mod feedback;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY,
    content_hash TEXT NOT NULL,
    language TEXT NOT NULL,
    indexed_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS chunks (
    chunk_id TEXT PRIMARY KEY,
    file_path TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    language TEXT NOT NULL,
    symbol_name TEXT,
    content TEXT NOT NULL,
    embedding BLOB,
    FOREIGN KEY (file_path) REFERENCES files(path) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_path);

CREATE TABLE IF NOT EXISTS feedback_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    query_key TEXT NOT NULL,
    query_text TEXT NOT NULL,
    chunk_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    observed_rank INTEGER,
    timestamp INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_feedback_pair ON feedback_events(query_key, chunk_id);
CREATE INDEX IF NOT EXISTS idx_feedback_time ON feedback_events(timestamp);

CREATE TABLE IF NOT EXISTS feedback_aggregates (
    query_key TEXT NOT NULL,
    chunk_id TEXT NOT NULL,
    weight REAL NOT NULL,
    event_count INTEGER NOT NULL,
    anchored_at INTEGER NOT NULL,
    PRIMARY KEY (query_key, chunk_id)
);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// A wrapper around a SQLite connection initialized with the application schema.
pub struct Db {
    pub(crate) conn: Connection,
}

impl Db {
    /// Open a database connection at the given path and initialize the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Initializing database: {}", path.display());

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self { conn })
    }

    /// Open an in-memory database connection (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        use rusqlite::OptionalExtension;
        self.conn
            .query_row("SELECT value FROM meta WHERE key = ?", [key], |row| row.get(0))
            .optional()
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }
}

/// Little-endian f32 bytes.
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Inverse of [`serialize_vector`]; a trailing partial value is ignored.
pub fn deserialize_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

const PROJECT_ROOT_KEY: &str = "project_root";

/// Both persistence capabilities over one SQLite connection.
pub struct SqliteStore {
    db: Mutex<Db>,
}

impl SqliteStore {
    pub fn new(db: Db) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        Ok(Self::new(Db::open(path)?))
    }

    pub fn open_in_memory() -> crate::Result<Self> {
        Ok(Self::new(Db::open_in_memory()?))
    }

    /// Open `{collection}.db` under `data_dir`, creating the directory.
    pub fn open_collection(data_dir: &Path, collection: &str) -> crate::Result<Arc<Self>> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Arc::new(Self::open(data_dir.join(format!("{collection}.db")))?))
    }
}

impl ChunkBackend for SqliteStore {
    fn persist_file(&self, file: &FileRecord, chunks: &[Chunk]) -> crate::Result<()> {
        Ok(self.db.lock().replace_file(file, chunks)?)
    }

    fn remove_file(&self, path: &str) -> crate::Result<bool> {
        Ok(self.db.lock().delete_file(path)?)
    }

    fn load_files(&self) -> crate::Result<Vec<FileRecord>> {
        Ok(self.db.lock().list_files()?)
    }

    fn load_chunks(&self) -> crate::Result<Vec<Chunk>> {
        Ok(self.db.lock().list_chunks()?)
    }

    fn set_project_root(&self, root: &str) -> crate::Result<()> {
        Ok(self.db.lock().set_meta(PROJECT_ROOT_KEY, root)?)
    }

    fn project_root(&self) -> crate::Result<Option<String>> {
        Ok(self.db.lock().get_meta(PROJECT_ROOT_KEY)?)
    }
}

impl FeedbackBackend for SqliteStore {
    fn persist_feedback(&self, event: &FeedbackEvent) -> crate::Result<()> {
        Ok(self.db.lock().insert_feedback(event)?)
    }

    fn load_feedback(&self, query_key: &str, chunk_id: &str) -> crate::Result<Vec<FeedbackEvent>> {
        Ok(self.db.lock().feedback_for(query_key, chunk_id)?)
    }

    fn load_all_feedback(&self) -> crate::Result<Vec<FeedbackEvent>> {
        Ok(self.db.lock().all_feedback()?)
    }

    fn load_aggregates(&self) -> crate::Result<Vec<FeedbackAggregate>> {
        Ok(self.db.lock().list_aggregates()?)
    }

    fn roll_up(&self, aggregates: &[FeedbackAggregate], cutoff: DateTime<Utc>) -> crate::Result<usize> {
        Ok(self.db.lock().roll_up(aggregates, cutoff)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_init() {
        let db = Db::open_in_memory().expect("Failed to open in-memory DB");

        let tables: usize = db.conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type='table' AND name IN ('files', 'chunks', 'feedback_events', 'feedback_aggregates', 'meta');",
            [],
            |row| row.get(0),
        ).unwrap();

        assert_eq!(tables, 5);
    }

    #[test]
    fn test_serialize_vector() {
        let vec = vec![1.0, 2.0, -3.5];
        let bytes = serialize_vector(&vec);
        assert_eq!(bytes.len(), 12);

        // 1.0f32 -> 00 00 80 3f
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x80, 0x3f]);
        // -3.5f32 -> 00 00 60 c0
        assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x60, 0xc0]);
        assert_eq!(deserialize_vector(&bytes), vec);
    }

    #[test]
    fn test_meta_upsert() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.project_root().unwrap(), None);
        store.set_project_root("/tmp/a").unwrap();
        store.set_project_root("/tmp/b").unwrap();
        assert_eq!(store.project_root().unwrap().as_deref(), Some("/tmp/b"));
    }

    #[test]
    fn test_open_collection_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let store = SqliteStore::open_collection(&data_dir, "proj").unwrap();
        store.set_project_root("/x").unwrap();
        assert!(data_dir.join("proj.db").exists());
    }
}
