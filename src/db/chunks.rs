use rusqlite::{Result, params};

use super::{Db, deserialize_vector, serialize_vector};
use crate::store::backend::FileRecord;
use crate::store::chunk::Chunk;

impl Db {
    /// All indexed files.
    pub fn list_files(&self) -> Result<Vec<FileRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, content_hash, language FROM files ORDER BY path")?;
        let rows = stmt.query_map([], |row| {
            Ok(FileRecord {
                path: row.get(0)?,
                content_hash: row.get(1)?,
                language: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    /// Deletes a file; its chunks go with it through the cascade.
    pub fn delete_file(&self, path: &str) -> Result<bool> {
        let rows = self.conn.execute("DELETE FROM files WHERE path = ?", params![path])?;
        Ok(rows > 0)
    }

    /// Inserts or replaces a file and its whole chunk set in one transaction.
    pub fn replace_file(&mut self, file: &FileRecord, chunks: &[Chunk]) -> Result<()> {
        let tx = self.conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO files (path, content_hash, language, indexed_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(path) DO UPDATE SET
                content_hash = excluded.content_hash,
                language = excluded.language,
                indexed_at = CURRENT_TIMESTAMP
            "#,
            params![file.path, file.content_hash, file.language],
        )?;

        // Clean up old contents if any (re-indexing)
        tx.execute("DELETE FROM chunks WHERE file_path = ?", params![file.path])?;

        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO chunks (chunk_id, file_path, start_line, end_line, language, symbol_name, content, embedding)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for chunk in chunks {
                stmt.execute(params![
                    chunk.chunk_id,
                    file.path,
                    chunk.start_line as i64,
                    chunk.end_line as i64,
                    chunk.language,
                    chunk.symbol,
                    chunk.content,
                    chunk.embedding.as_deref().map(serialize_vector),
                ])?;
            }
        }

        tx.commit()
    }

    /// Every stored chunk, rebuilt with its token postings.
    pub fn list_chunks(&self) -> Result<Vec<Chunk>> {
        let mut stmt = self.conn.prepare(
            "SELECT file_path, start_line, end_line, language, symbol_name, content, embedding
             FROM chunks ORDER BY file_path, start_line, end_line",
        )?;
        let rows = stmt.query_map([], |row| {
            let file_path: String = row.get(0)?;
            let start_line: i64 = row.get(1)?;
            let end_line: i64 = row.get(2)?;
            let language: String = row.get(3)?;
            let symbol: Option<String> = row.get(4)?;
            let content: String = row.get(5)?;
            let embedding: Option<Vec<u8>> = row.get(6)?;
            Ok(Chunk::new(
                &file_path,
                start_line.max(1) as usize,
                end_line.max(1) as usize,
                &language,
                symbol,
                content,
            )
            .with_embedding(embedding.map(|b| deserialize_vector(&b))))
        })?;
        rows.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(path: &str, hash: &str) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            content_hash: hash.to_string(),
            language: "rust".to_string(),
        }
    }

    fn count(db: &Db, table: &str) -> i64 {
        db.conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_files_crud() {
        let mut db = Db::open_in_memory().unwrap();
        let chunks = vec![
            Chunk::new("src/a.rs", 1, 3, "rust", Some("main".into()), "fn main() {}".into())
                .with_embedding(Some(vec![0.1, 0.2])),
            Chunk::new("src/a.rs", 4, 6, "rust", None, "// tail".into()),
        ];
        db.replace_file(&record("src/a.rs", "h1"), &chunks).unwrap();

        assert_eq!(db.list_files().unwrap(), vec![record("src/a.rs", "h1")]);
        assert_eq!(count(&db, "chunks"), 2);

        let loaded = db.list_chunks().unwrap();
        assert_eq!(loaded, chunks);

        // re-index replaces the old chunk set
        let replacement = vec![Chunk::new("src/a.rs", 1, 9, "rust", None, "fn other() {}".into())];
        db.replace_file(&record("src/a.rs", "h2"), &replacement).unwrap();
        assert_eq!(count(&db, "chunks"), 1);
        assert_eq!(db.list_files().unwrap()[0].content_hash, "h2");

        // cascade
        assert!(db.delete_file("src/a.rs").unwrap());
        assert!(!db.delete_file("src/a.rs").unwrap());
        assert_eq!(count(&db, "chunks"), 0);
    }
}
