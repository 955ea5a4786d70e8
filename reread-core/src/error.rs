//! Error type shared by every layer of the cache.
//!
//! Store errors are decoded once at the `rusqlite` boundary; callers only
//! ever see `CacheError`.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Everything that can fail a cache call.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The requested path is missing or unreadable. No state was mutated.
    #[error("file not found or unreadable: {path}")]
    NotFound {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Lock contention outlasted the retry budget.
    #[error("store busy after {attempts} attempts")]
    StoreBusy { attempts: u32 },

    /// `revert_file` asked for more history than is stored.
    #[error("insufficient history for {path}: requested {requested} steps back, {available} available")]
    InsufficientHistory {
        path: String,
        requested: usize,
        available: usize,
    },

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The async connection thread is gone.
    #[error("connection: {0}")]
    Connection(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config: {0}")]
    Config(String),
}

impl CacheError {
    /// Returns `true` when the error is a SQLite busy/locked signal that is
    /// worth retrying.
    pub fn is_busy(&self) -> bool {
        match self {
            CacheError::Sqlite(rusqlite::Error::SqliteFailure(code, _)) => matches!(
                code.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

impl From<tokio_rusqlite::Error<CacheError>> for CacheError {
    fn from(err: tokio_rusqlite::Error<CacheError>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(inner) => inner,
            other => CacheError::Connection(other.to_string()),
        }
    }
}

impl From<tokio_rusqlite::Error> for CacheError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Error(inner) => CacheError::Sqlite(inner),
            other => CacheError::Connection(other.to_string()),
        }
    }
}
