//! Crate-wide error type.
use thiserror::Error;

use crate::embedder::EmbedderError;

/// Errors surfaced by the retrieval engine.
///
/// Missing optional capabilities are not errors: they answer
/// [`Capability::Unavailable`](crate::capability::Capability) and the engine
/// degrades, reporting the skipped stage. `Embedder` carries a failure that
/// survived the retry.
#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("store I/O failure: {0}")]
    Store(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("embedding failed: {0}")]
    Embedder(#[from] EmbedderError),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Store(err.to_string())
    }
}

impl Error {
    /// Shorthand for [`Error::MalformedInput`].
    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedInput(msg.into())
    }

    /// Whether retrying the failed operation could succeed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Store(_) | Error::Io(_) | Error::Embedder(EmbedderError::InferenceFailed(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
