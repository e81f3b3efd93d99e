//! CLI error type.

use thiserror::Error;

/// Errors surfaced to the user.
#[derive(Debug, Error)]
pub enum CliError {
    /// Bad command-line input.
    #[error("{0}")]
    Usage(String),

    /// The engine refused the operation.
    #[error(transparent)]
    Sync(#[from] intake_sync_engine::SyncError),

    /// The journal could not be opened.
    #[error(transparent)]
    Storage(#[from] intake_storage::StorageError),

    /// The HTTP client could not be built.
    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),

    /// Output could not be rendered.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
