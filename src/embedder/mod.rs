/// Embedder capability and shared types for text embedding.
///
/// The numeric model lives outside this crate; the engine only sees this
/// trait. A model that is not installed answers [`Capability::Unavailable`]
/// and the engine falls back to lexical scoring.
pub mod mock;

use async_trait::async_trait;
use thiserror::Error;

use crate::capability::Capability;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(
        &self,
        text: &str,
        language: Option<&str>,
    ) -> Result<Capability<Vec<f32>>, EmbedderError>;

    /// Higher-fidelity embedding tuned for source code.
    ///
    /// Models without a code-specific head report `Unavailable`.
    async fn embed_code(
        &self,
        _text: &str,
        _language: &str,
    ) -> Result<Capability<Vec<f32>>, EmbedderError> {
        Ok(Capability::Unavailable)
    }

    /// Embed multiple text strings into vectors.
    ///
    /// Returns `Unavailable` as soon as any single text is unavailable.
    async fn embed_batch(
        &self,
        texts: &[String],
        language: Option<&str>,
    ) -> Result<Capability<Vec<Vec<f32>>>, EmbedderError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            match self.embed(text, language).await? {
                Capability::Ready(v) => vectors.push(v),
                Capability::Unavailable => return Ok(Capability::Unavailable),
            }
        }
        Ok(Capability::Ready(vectors))
    }

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}

/// Cosine similarity of two vectors, `None` when the lengths differ or either
/// vector has zero norm.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a <= f64::EPSILON || norm_b <= f64::EPSILON {
        return None;
    }
    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    sim.is_finite().then(|| sim.clamp(-1.0, 1.0))
}
