//! Project walking, tree-sitter parsing and chunking.
pub mod chunker;
pub mod code_parser;
pub mod core;
pub mod languages;
pub mod relations;
pub mod walker;

pub use self::core::{IndexFailure, IndexSummary, Indexer};
