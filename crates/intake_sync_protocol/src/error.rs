//! Error types for protocol operations.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while validating or decoding protocol data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The mutation does not have the shape its kind requires.
    #[error("invalid mutation: {0}")]
    InvalidMutation(String),

    /// A journal record failed its integrity checks.
    #[error("journal corrupted at offset {offset}: {reason}")]
    Corrupted {
        /// Byte offset of the offending record.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// The journal was written by a newer, incompatible format version.
    #[error("unsupported journal version {found}, newest understood is {supported}")]
    UnsupportedVersion {
        /// Version found on disk.
        found: u16,
        /// Version this build writes.
        supported: u16,
    },

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Creates an invalid-mutation error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidMutation(message.into())
    }
}
