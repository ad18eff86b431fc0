//! Hybrid fusion of lexical and vector result lists.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::types::{ScoredCandidate, ScoredChunk, cmp_scored, sanitize};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategy {
    /// `α·vector + (1-α)·lexical` over min-max normalized scores.
    #[default]
    Linear,
    /// Reciprocal rank fusion.
    Rrf,
    /// Larger of the two normalized scores.
    Max,
}

impl FusionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionStrategy::Linear => "linear",
            FusionStrategy::Rrf => "rrf",
            FusionStrategy::Max => "max",
        }
    }
}

impl fmt::Display for FusionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FusionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(FusionStrategy::Linear),
            "rrf" => Ok(FusionStrategy::Rrf),
            "max" => Ok(FusionStrategy::Max),
            other => Err(Error::malformed(format!("unknown fusion strategy '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionParams {
    pub strategy: FusionStrategy,
    pub linear_alpha: f64,
    pub rrf_k: f64,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            strategy: FusionStrategy::Linear,
            linear_alpha: 0.6,
            rrf_k: 60.0,
        }
    }
}

/// Merge per-variant result lists, keeping each chunk's best score.
///
/// The output is ordered by score descending, then `chunk_id`.
pub fn merge_variants<I>(lists: I) -> Vec<ScoredChunk>
where
    I: IntoIterator<Item = Vec<ScoredChunk>>,
{
    let mut best: BTreeMap<String, f64> = BTreeMap::new();
    for list in lists {
        for hit in list {
            let score = sanitize(hit.score);
            best.entry(hit.chunk_id)
                .and_modify(|s| *s = s.max(score))
                .or_insert(score);
        }
    }
    let mut merged: Vec<ScoredChunk> = best
        .into_iter()
        .map(|(id, score)| ScoredChunk::new(id, score))
        .collect();
    merged.sort_by(cmp_scored);
    merged
}

/// Min-max normalize into `[0, 1]`. A list whose scores are all equal maps
/// to 1.0.
pub fn normalize(list: &[ScoredChunk]) -> HashMap<&str, f64> {
    let (min, max) = list.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), h| {
        (lo.min(h.score), hi.max(h.score))
    });
    let range = max - min;
    list.iter()
        .map(|h| {
            let norm = if range.abs() < f64::EPSILON {
                1.0
            } else {
                (h.score - min) / range
            };
            (h.chunk_id.as_str(), sanitize(norm))
        })
        .collect()
}

/// Fuse the merged lexical and vector lists into candidates, best first.
///
/// Both inputs must be ordered as [`merge_variants`] orders them; RRF reads
/// ranks from that order.
pub fn fuse(lexical: &[ScoredChunk], vector: &[ScoredChunk], params: &FusionParams) -> Vec<ScoredCandidate> {
    let lex_raw: HashMap<&str, f64> = lexical.iter().map(|h| (h.chunk_id.as_str(), h.score)).collect();
    let vec_raw: HashMap<&str, f64> = vector.iter().map(|h| (h.chunk_id.as_str(), h.score)).collect();
    let ids: BTreeSet<&str> = lex_raw.keys().chain(vec_raw.keys()).copied().collect();

    let fused: HashMap<&str, f64> = match params.strategy {
        FusionStrategy::Linear => {
            let lex = normalize(lexical);
            let vec = normalize(vector);
            let alpha = match (lexical.is_empty(), vector.is_empty()) {
                (false, true) => 0.0,
                (true, false) => 1.0,
                _ => params.linear_alpha,
            };
            ids.iter()
                .map(|id| {
                    let v = vec.get(id).copied().unwrap_or(0.0);
                    let l = lex.get(id).copied().unwrap_or(0.0);
                    (*id, alpha * v + (1.0 - alpha) * l)
                })
                .collect()
        }
        FusionStrategy::Rrf => {
            let mut scores: HashMap<&str, f64> = HashMap::new();
            for list in [lexical, vector] {
                for (rank, hit) in list.iter().enumerate() {
                    *scores.entry(hit.chunk_id.as_str()).or_insert(0.0) +=
                        1.0 / (params.rrf_k + (rank + 1) as f64);
                }
            }
            scores
        }
        FusionStrategy::Max => {
            let lex = normalize(lexical);
            let vec = normalize(vector);
            ids.iter()
                .map(|id| {
                    let v = vec.get(id).copied().unwrap_or(0.0);
                    let l = lex.get(id).copied().unwrap_or(0.0);
                    (*id, v.max(l))
                })
                .collect()
        }
    };

    let mut candidates: Vec<ScoredCandidate> = ids
        .into_iter()
        .map(|id| {
            ScoredCandidate::fused(
                id.to_string(),
                lex_raw.get(id).copied(),
                vec_raw.get(id).copied(),
                fused.get(id).copied().unwrap_or(0.0),
            )
        })
        .collect();
    super::types::sort_candidates(&mut candidates, super::types::RankOrdering::ScoreThenDepth);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn list(items: &[(&str, f64)]) -> Vec<ScoredChunk> {
        let mut v: Vec<ScoredChunk> = items.iter().map(|(id, s)| ScoredChunk::new(*id, *s)).collect();
        v.sort_by(cmp_scored);
        v
    }

    fn ids(candidates: &[ScoredCandidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.chunk_id.as_str()).collect()
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("RRF".parse::<FusionStrategy>().unwrap(), FusionStrategy::Rrf);
        assert!(matches!("borda".parse::<FusionStrategy>(), Err(Error::MalformedInput(_))));
    }

    #[test]
    fn test_merge_keeps_best_score() {
        let merged = merge_variants(vec![list(&[("a", 1.0), ("b", 3.0)]), list(&[("a", 5.0)])]);
        assert_eq!(merged, list(&[("a", 5.0), ("b", 3.0)]));
    }

    #[test]
    fn test_normalize_equal_scores_is_one() {
        let l = list(&[("a", 2.0), ("b", 2.0)]);
        let n = normalize(&l);
        assert_eq!(n["a"], 1.0);
        assert_eq!(n["b"], 1.0);
        assert!(normalize(&[]).is_empty());
    }

    #[test]
    fn test_linear_fusion() {
        let lexical = list(&[("a", 10.0), ("b", 5.0), ("c", 0.0)]);
        let vector = list(&[("b", 0.9), ("c", 0.1)]);
        let fused = fuse(&lexical, &vector, &FusionParams::default());
        // a: 0.4*1.0, b: 0.6*1 + 0.4*0.5, c: 0
        assert_eq!(ids(&fused), vec!["b", "a", "c"]);
        assert!((fused[0].fused_score - 0.8).abs() < 1e-9);
        assert!((fused[1].fused_score - 0.4).abs() < 1e-9);
        assert_eq!(fused[0].lexical_score, Some(5.0));
        assert_eq!(fused[0].vector_score, Some(0.9));
        assert_eq!(fused[1].vector_score, None);
    }

    #[test]
    fn test_linear_with_one_empty_source() {
        let lexical = list(&[("a", 4.0), ("b", 2.0)]);
        let fused = fuse(&lexical, &[], &FusionParams::default());
        assert_eq!(fused[0].fused_score, 1.0);
        assert_eq!(fused[1].fused_score, 0.0);

        let vector = list(&[("v", 0.3)]);
        let fused = fuse(&[], &vector, &FusionParams::default());
        assert_eq!(fused[0].fused_score, 1.0);
    }

    #[test]
    fn test_linear_monotone_in_vector_score() {
        let lexical = list(&[("a", 3.0), ("b", 1.0), ("c", 2.0)]);
        let mut previous = f64::NEG_INFINITY;
        for v in [0.1, 0.3, 0.5, 0.7] {
            let vector = list(&[("a", v), ("b", 0.4), ("c", 0.2)]);
            let fused = fuse(&lexical, &vector, &FusionParams::default());
            let a = fused.iter().find(|c| c.chunk_id == "a").unwrap().fused_score;
            assert!(a >= previous, "{a} < {previous}");
            previous = a;
        }
    }

    #[test]
    fn test_rrf_fusion() {
        let params = FusionParams {
            strategy: FusionStrategy::Rrf,
            ..FusionParams::default()
        };
        let lexical = list(&[("a", 9.0), ("b", 1.0)]);
        let vector = list(&[("b", 0.9), ("c", 0.5)]);
        let fused = fuse(&lexical, &vector, &params);
        assert_eq!(fused[0].chunk_id, "b");
        let expected_b = 1.0 / 62.0 + 1.0 / 61.0;
        assert!((fused[0].fused_score - expected_b).abs() < 1e-12);
        // a and c both rank first in one list only
        assert_eq!(ids(&fused[1..]), vec!["a", "c"]);
    }

    #[test]
    fn test_max_fusion() {
        let params = FusionParams {
            strategy: FusionStrategy::Max,
            ..FusionParams::default()
        };
        let lexical = list(&[("a", 4.0), ("b", 0.0)]);
        let vector = list(&[("b", 0.9), ("a", 0.1)]);
        let fused = fuse(&lexical, &vector, &params);
        assert!(fused.iter().all(|c| c.fused_score == 1.0));
        assert_eq!(ids(&fused), vec!["a", "b"]);
    }
}
