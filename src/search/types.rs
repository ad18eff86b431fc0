use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pipeline stage that contributed to a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Lexical,
    Vector,
    QueryExpansion,
    Feedback,
    Graph,
    Rerank,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Lexical => "lexical",
            Stage::Vector => "vector",
            Stage::QueryExpansion => "query_expansion",
            Stage::Feedback => "feedback",
            Stage::Graph => "graph",
            Stage::Rerank => "rerank",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Provenance = BTreeSet<Stage>;

/// How graph depth interacts with score when ordering results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankOrdering {
    /// Score first; depth only breaks exact ties.
    #[default]
    ScoreThenDepth,
    /// Every direct match before any graph-expanded one.
    DepthThenScore,
}

impl FromStr for RankOrdering {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "score_then_depth" => Ok(RankOrdering::ScoreThenDepth),
            "depth_then_score" => Ok(RankOrdering::DepthThenScore),
            other => Err(Error::malformed(format!("unknown rank ordering '{other}'"))),
        }
    }
}

/// A chunk id with one scorer's raw score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub score: f64,
}

impl ScoredChunk {
    pub fn new(chunk_id: impl Into<String>, score: f64) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            score: sanitize(score),
        }
    }
}

/// A chunk plus its score provenance for one query.
///
/// Every stage builds a new value; `final_score` is always
/// [`final_score`] of the other fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub chunk_id: String,
    pub lexical_score: Option<f64>,
    pub vector_score: Option<f64>,
    pub fused_score: f64,
    pub feedback_boost: f64,
    pub rerank_score: Option<f64>,
    pub final_score: f64,
    pub graph_depth: usize,
    pub provenance: Provenance,
    #[serde(skip)]
    rerank_beta: f64,
}

impl ScoredCandidate {
    /// Direct hit straight out of fusion.
    pub fn fused(
        chunk_id: String,
        lexical_score: Option<f64>,
        vector_score: Option<f64>,
        fused_score: f64,
    ) -> Self {
        let mut provenance = Provenance::new();
        if lexical_score.is_some() {
            provenance.insert(Stage::Lexical);
        }
        if vector_score.is_some() {
            provenance.insert(Stage::Vector);
        }
        let fused_score = sanitize(fused_score);
        Self {
            chunk_id,
            lexical_score,
            vector_score,
            fused_score,
            feedback_boost: 0.0,
            rerank_score: None,
            final_score: final_score(fused_score, 0.0, None, 0.0),
            graph_depth: 0,
            provenance,
            rerank_beta: 0.0,
        }
    }

    /// Candidate reached through the call graph from a seed.
    pub fn graph_expanded(chunk_id: String, graph_depth: usize, score: f64) -> Self {
        let fused_score = sanitize(score);
        Self {
            chunk_id,
            lexical_score: None,
            vector_score: None,
            fused_score,
            feedback_boost: 0.0,
            rerank_score: None,
            final_score: final_score(fused_score, 0.0, None, 0.0),
            graph_depth,
            provenance: Provenance::from([Stage::Graph]),
            rerank_beta: 0.0,
        }
    }

    #[must_use]
    pub fn with_stage(&self, stage: Stage) -> Self {
        let mut next = self.clone();
        next.provenance.insert(stage);
        next
    }

    #[must_use]
    pub fn with_boost(&self, boost: f64) -> Self {
        let mut next = self.clone();
        next.feedback_boost = sanitize(boost);
        next.final_score =
            final_score(next.fused_score, next.feedback_boost, next.rerank_score, next.rerank_beta);
        if next.feedback_boost != 0.0 {
            next.provenance.insert(Stage::Feedback);
        }
        next
    }

    #[must_use]
    pub fn with_rerank(&self, rerank_score: f64, beta: f64) -> Self {
        let mut next = self.clone();
        next.rerank_score = Some(sanitize(rerank_score));
        next.rerank_beta = beta;
        next.final_score = final_score(next.fused_score, next.feedback_boost, next.rerank_score, beta);
        next.provenance.insert(Stage::Rerank);
        next
    }
}

/// `base = fused + boost`; a rerank score blends in with weight `beta`.
#[must_use]
pub fn final_score(fused_score: f64, feedback_boost: f64, rerank_score: Option<f64>, beta: f64) -> f64 {
    let base = sanitize(fused_score) + sanitize(feedback_boost);
    let score = match rerank_score {
        Some(r) => beta * sanitize(r) + (1.0 - beta) * base,
        None => base,
    };
    sanitize(score)
}

/// Non-finite scores count as zero.
#[must_use]
pub fn sanitize(score: f64) -> f64 {
    if score.is_finite() { score } else { 0.0 }
}

/// Score rounded to 1e-9 so float noise cannot flip an ordering.
#[must_use]
pub fn quantize(score: f64) -> i64 {
    (sanitize(score) * 1e9).round() as i64
}

/// Descending score, ascending `chunk_id`.
pub fn cmp_scored(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    quantize(b.score)
        .cmp(&quantize(a.score))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

/// Result order for candidates under `ordering`.
pub fn cmp_candidates(a: &ScoredCandidate, b: &ScoredCandidate, ordering: RankOrdering) -> Ordering {
    let by_score = quantize(b.final_score).cmp(&quantize(a.final_score));
    let by_depth = a.graph_depth.cmp(&b.graph_depth);
    let primary = match ordering {
        RankOrdering::ScoreThenDepth => by_score.then(by_depth),
        RankOrdering::DepthThenScore => by_depth.then(by_score),
    };
    primary.then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

pub fn sort_candidates(candidates: &mut [ScoredCandidate], ordering: RankOrdering) {
    candidates.sort_by(|a, b| cmp_candidates(a, b, ordering));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct(id: &str, score: f64) -> ScoredCandidate {
        ScoredCandidate::fused(id.to_string(), Some(score), None, score)
    }

    #[test]
    fn test_final_score_is_pure() {
        assert!((final_score(0.5, 0.2, None, 0.7) - 0.7).abs() < 1e-12);
        let blended = final_score(0.5, 0.1, Some(1.0), 0.7);
        assert!((blended - (0.7 + 0.3 * 0.6)).abs() < 1e-12);
        assert_eq!(final_score(f64::NAN, 0.1, None, 0.7), 0.1);
    }

    #[test]
    fn test_with_boost_builds_new_candidate() {
        let base = direct("a", 0.4);
        let boosted = base.with_boost(-0.25);
        assert_eq!(base.final_score, 0.4);
        assert!((boosted.final_score - 0.15).abs() < 1e-12);
        assert!(boosted.provenance.contains(&Stage::Feedback));
        assert!(!base.provenance.contains(&Stage::Feedback));
        assert!(!direct("a", 0.4).with_boost(0.0).provenance.contains(&Stage::Feedback));
    }

    #[test]
    fn test_depth_zero_wins_equal_scores() {
        let mut list = vec![
            ScoredCandidate::graph_expanded("a".into(), 1, 0.5),
            direct("z", 0.5),
        ];
        sort_candidates(&mut list, RankOrdering::ScoreThenDepth);
        assert_eq!(list[0].chunk_id, "z");
    }

    #[test]
    fn test_depth_then_score_keeps_direct_first() {
        let mut list = vec![
            ScoredCandidate::graph_expanded("g".into(), 1, 0.9),
            direct("d", 0.1),
        ];
        sort_candidates(&mut list, RankOrdering::ScoreThenDepth);
        assert_eq!(list[0].chunk_id, "g");
        sort_candidates(&mut list, RankOrdering::DepthThenScore);
        assert_eq!(list[0].chunk_id, "d");
    }

    #[test]
    fn test_quantized_ties_break_by_id() {
        let mut list = vec![direct("b", 0.3 + 1e-12), direct("a", 0.3)];
        sort_candidates(&mut list, RankOrdering::ScoreThenDepth);
        assert_eq!(list[0].chunk_id, "a");
    }

    #[test]
    fn test_rank_ordering_from_str() {
        assert_eq!("depth-then-score".parse::<RankOrdering>().unwrap(), RankOrdering::DepthThenScore);
        assert!(matches!("random".parse::<RankOrdering>(), Err(Error::MalformedInput(_))));
    }
}
