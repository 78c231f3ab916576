//! Typed error surface of the engine.
//!
//! Every public operation returns [`CoreError`]. The CLI maps errors to exit
//! codes: expected (typed) failures exit `1`, unexpected failures exit `2`.

use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors surfaced by the indexing and search core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("project is not initialized at {0} (run `ctx init` first)")]
    NotInitialized(PathBuf),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error(
        "vector dimension mismatch: index was built with {stored} dimensions, \
         configuration requests {requested} (rebuild the index to change dimensions)"
    )]
    DimensionMismatch { stored: usize, requested: usize },

    #[error(
        "embedder mismatch: index was built with {stored}, configuration \
         requests {requested} (rebuild the index to switch embedders)"
    )]
    EmbedderMismatch { stored: String, requested: String },

    #[error("failed to parse {path}: {reason}")]
    ParseFailed { path: String, reason: String },

    #[error("embedding failed: {0}")]
    EmbedderFailed(String),

    #[error("database is corrupted: {0}")]
    DbCorrupted(String),

    #[error("database write failed")]
    DbWriteFailed(#[source] sqlx::Error),

    #[error("search failed: {0}")]
    SearchFailed(String),

    #[error("watcher failed: {0}")]
    WatcherFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Exit code the CLI should use for this error.
    ///
    /// Typed, user-actionable failures exit `1`; anything the user cannot be
    /// expected to anticipate (raw io failures) exits `2`.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::Io(_) => 2,
            _ => 1,
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.message().contains("malformed") => {
                CoreError::DbCorrupted(db.message().to_string())
            }
            _ => CoreError::DbWriteFailed(err),
        }
    }
}
