/// Mock embedder for testing and offline use.
///
/// Generates deterministic embeddings by feature-hashing the lexical tokens of
/// the text, so texts that share words end up close in cosine space.
use std::hash::{DefaultHasher, Hash, Hasher};

use async_trait::async_trait;

use super::{Embedder, EmbedderError};
use crate::capability::Capability;
use crate::store::chunk::tokenize;

/// A mock embedder that produces deterministic vectors from token hashes.
///
/// Useful for testing without loading a real model. Built with
/// [`MockEmbedder::unavailable`] it behaves like a missing model.
pub struct MockEmbedder {
    pub dimensions: usize,
    pub available: bool,
}

impl MockEmbedder {
    /// Create a new `MockEmbedder` with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            available: true,
        }
    }

    /// An embedder whose model is not installed.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            dimensions: 384,
            available: false,
        }
    }

    fn hash_embed(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let hash = hasher.finish();
            let slot = (hash % self.dimensions as u64) as usize;
            // top bit picks the sign so unrelated tokens cancel out on average
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            embedding[slot] += sign;
        }

        // L2 normalize
        let norm_sq: f32 = embedding.iter().map(|v| v * v).sum();
        if norm_sq > 0.0 {
            let inv = 1.0 / norm_sq.sqrt();
            for v in &mut embedding {
                *v *= inv;
            }
        }
        embedding
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(
        &self,
        text: &str,
        _language: Option<&str>,
    ) -> Result<Capability<Vec<f32>>, EmbedderError> {
        if !self.available {
            return Ok(Capability::Unavailable);
        }
        Ok(Capability::Ready(self.hash_embed(text)))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
