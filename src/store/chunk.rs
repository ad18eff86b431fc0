use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A semantically coherent slice of one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub content: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub language: String,
    /// Function/class the chunk was cut from, when the parser knew.
    pub symbol: Option<String>,
    #[serde(skip)]
    pub token_postings: BTreeMap<String, u32>,
    #[serde(skip)]
    pub token_count: u32,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    /// Build a chunk, deriving its id and token postings.
    ///
    /// `end_line` is raised to `start_line` if it is smaller.
    pub fn new(
        file_path: &str,
        start_line: usize,
        end_line: usize,
        language: &str,
        symbol: Option<String>,
        content: String,
    ) -> Self {
        let end_line = end_line.max(start_line);
        let token_postings = token_postings(&content);
        let token_count = token_postings.values().sum();
        Self {
            chunk_id: chunk_id(file_path, start_line, end_line),
            content,
            file_path: file_path.to_string(),
            start_line,
            end_line,
            language: language.to_string(),
            symbol,
            token_postings,
            token_count,
            embedding: None,
        }
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Option<Vec<f32>>) -> Self {
        self.embedding = embedding;
        self
    }

    /// Text handed to the embedding model.
    pub fn embedding_text(&self) -> String {
        match &self.symbol {
            Some(symbol) => format!("{} {}: {}", self.language, symbol, self.content),
            None => format!("{}: {}", self.language, self.content),
        }
    }

    #[must_use]
    pub fn contains_line(&self, line: usize) -> bool {
        self.start_line <= line && line <= self.end_line
    }

    #[must_use]
    pub fn line_span(&self) -> usize {
        self.end_line - self.start_line + 1
    }
}

/// Stable chunk id for a file region: re-indexing the same region yields the
/// same id.
pub fn chunk_id(file_path: &str, start_line: usize, end_line: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update(b":");
    hasher.update(start_line.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(end_line.to_string().as_bytes());
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

/// Lowercase and split on non-alphanumeric boundaries.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Term frequencies of `text`.
pub fn token_postings(text: &str) -> BTreeMap<String, u32> {
    let mut postings = BTreeMap::new();
    for token in tokenize(text) {
        *postings.entry(token).or_insert(0) += 1;
    }
    postings
}
