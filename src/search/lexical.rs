//! BM25-style lexical scoring over the chunk store's postings.
use std::collections::{BTreeSet, HashMap};

use super::types::{ScoredChunk, cmp_scored};
use crate::store::ChunkIndex;
use crate::store::chunk::tokenize;

pub const K1: f64 = 1.2;
pub const B: f64 = 0.75;

/// `ln((N - n + 0.5) / (n + 0.5) + 1)`; always positive.
#[must_use]
pub fn idf(total_chunks: usize, containing: usize) -> f64 {
    let n = total_chunks as f64;
    let n_t = containing as f64;
    ((n - n_t + 0.5) / (n_t + 0.5) + 1.0).ln()
}

/// Saturated term frequency with length normalization.
#[must_use]
pub fn saturate(tf: f64, chunk_len: f64, avg_len: f64) -> f64 {
    let norm = if avg_len > 0.0 {
        1.0 - B + B * chunk_len / avg_len
    } else {
        1.0
    };
    tf * (K1 + 1.0) / (tf + K1 * norm)
}

/// Top `top_k` chunks for `query`, optionally restricted to one language.
pub fn lexical_search(
    index: &ChunkIndex,
    query: &str,
    top_k: usize,
    language: Option<&str>,
) -> Vec<ScoredChunk> {
    if top_k == 0 || index.is_empty() {
        return Vec::new();
    }
    let terms: BTreeSet<String> = tokenize(query).collect();
    let total = index.len();
    let avg_len = index.avg_chunk_tokens();

    let mut scores: HashMap<&str, f64> = HashMap::new();
    for term in &terms {
        let Some(postings) = index.postings(term) else {
            continue;
        };
        let term_idf = idf(total, postings.len());
        for (chunk_id, tf) in postings {
            let Some(chunk) = index.get(chunk_id) else {
                continue;
            };
            if language.is_some_and(|lang| !chunk.language.eq_ignore_ascii_case(lang)) {
                continue;
            }
            let weight = saturate(f64::from(*tf), f64::from(chunk.token_count), avg_len) * term_idf;
            *scores.entry(chunk_id.as_str()).or_insert(0.0) += weight;
        }
    }

    let mut results: Vec<ScoredChunk> = scores
        .into_iter()
        .map(|(id, score)| ScoredChunk::new(id, score))
        .collect();
    results.sort_by(cmp_scored);
    results.truncate(top_k);
    results
}
