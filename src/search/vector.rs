//! Cosine similarity over chunk embeddings.
use super::types::{ScoredChunk, cmp_scored};
use crate::embedder::cosine_similarity;
use crate::store::ChunkIndex;

/// Top `top_k` chunks by cosine similarity to `query_vector`.
///
/// Chunks without an embedding, or whose embedding has a different
/// dimensionality, are ignored; so are non-positive similarities. An index
/// without any usable embedding yields an empty list.
pub fn vector_search(
    index: &ChunkIndex,
    query_vector: &[f32],
    top_k: usize,
    language: Option<&str>,
) -> Vec<ScoredChunk> {
    if top_k == 0 || query_vector.is_empty() {
        return Vec::new();
    }
    let mut results: Vec<ScoredChunk> = index
        .chunks()
        .filter(|c| language.is_none_or(|lang| c.language.eq_ignore_ascii_case(lang)))
        .filter_map(|c| {
            let embedding = c.embedding.as_deref()?;
            let sim = cosine_similarity(query_vector, embedding)?;
            (sim > 0.0).then(|| ScoredChunk::new(c.chunk_id.as_str(), sim))
        })
        .collect();
    results.sort_by(cmp_scored);
    results.truncate(top_k);
    results
}
