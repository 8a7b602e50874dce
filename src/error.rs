use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the retrieval engine.
///
/// Variants correspond to the error kinds the engine must distinguish, not to
/// internal implementation details: callers match on kind, not on message text.
#[derive(Debug, Error)]
pub enum RagError {
    /// Path not absolute, path outside base dir, unsupported extension, file too
    /// large, empty content, empty query, limit out of range, disallowed source
    /// scheme, metadata too big.
    #[error("validation error: {0}")]
    Validation(String),

    /// Malformed PDF/DOCX/JSON after fallback, empty HTML extraction.
    #[error("parse error: {0}")]
    Parse(String),

    /// Cannot read/write the target file, cannot create the raw-data directory.
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Vector table open/insert/delete/search failure, schema mismatch.
    #[error("storage error: {0}")]
    Storage(String),

    /// Embedder load or inference failure.
    #[error("model error: {0}")]
    Model(String),

    /// Swap-in-progress, ingest-of-same-file-in-progress.
    #[error("concurrency error: {0}")]
    Concurrency(String),
}

pub type Result<T> = std::result::Result<T, RagError>;

impl RagError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn concurrency(msg: impl Into<String>) -> Self {
        Self::Concurrency(msg.into())
    }

    /// A short, stable code suitable for a user-visible error payload — details
    /// (paths, internal messages) are left to the `Display` impl, which callers
    /// should suppress in production.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Parse(_) => "parse",
            Self::Io { .. } => "io",
            Self::Storage(_) => "storage",
            Self::Model(_) => "model",
            Self::Concurrency(_) => "concurrency",
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
