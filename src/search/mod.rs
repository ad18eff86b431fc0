//! Scoring and fusion primitives used by the retrieval engine.
pub mod fusion;
pub mod lexical;
pub mod types;
pub mod vector;

pub use fusion::{FusionParams, FusionStrategy, fuse, merge_variants};
pub use lexical::lexical_search;
pub use types::{Provenance, RankOrdering, ScoredCandidate, ScoredChunk, Stage};
pub use vector::vector_search;
