//! Error types for Receipt Keeper

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("A receipt already exists for path: {0}")]
    DuplicatePath(String),

    #[error("Migration {id} failed: {cause}")]
    MigrationFailed { id: String, cause: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Remote store rejected credentials")]
    Unauthenticated,

    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Permanent failure: {0}")]
    Permanent(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether an upload that failed with this error should be retried.
    ///
    /// `Unauthenticated`, `NetworkUnavailable`, `NotFound` and `Transient`
    /// retry with backoff; everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unauthenticated
            | Self::NetworkUnavailable(_)
            | Self::NotFound(_)
            | Self::Transient(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            _ => false,
        }
    }

    /// Whether this is a cooperative cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
