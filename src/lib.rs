//! # coderank: hybrid code retrieval with a learning ranker
//!
//! Indexes a source tree into chunks, then ranks them for natural-language or
//! identifier queries by fusing lexical and vector scores, expanding queries,
//! following the call graph and folding in user feedback.
//!
//! ## Architecture
//!
//! - **[`config`]**: Configuration loading, validation and defaults
//! - **[`capability`]**: Optional-capability results and the single-retry helper
//! - **[`db`]**: SQLite persistence for chunks, files and feedback
//! - **[`embedder`]**: Embedding capability trait and the hashing embedder
//! - **[`indexer`]**: Project walk, Tree-sitter parsing, chunking, differential sync
//! - **[`store`]**: In-memory chunk index written through to the backend
//! - **[`search`]**: Lexical and vector scorers, score fusion, ordering
//! - **[`query`]**: Rule-based query expansion
//! - **[`feedback`]**: Event log and time-decayed ranking boosts
//! - **[`graph`]**: Call graph construction and bounded expansion
//! - **[`rerank`]**: Optional joint query/document re-scoring
//! - **[`retrieval`]**: The engine tying every stage together

pub mod capability;
pub mod config;
pub mod db;
pub mod embedder;
pub mod error;
pub mod feedback;
pub mod graph;
pub mod indexer;
pub mod query;
pub mod rerank;
pub mod retrieval;
pub mod search;
pub mod store;

pub use error::{Error, Result};
pub use retrieval::{
    CollectionStatus, IndexOptions, ResponseStatus, RetrievalEngine, RetrievalResponse,
    RetrieveOptions, RetrievedItem,
};
