//! Error types for the sync engine.
//!
//! Delivery failures are not errors: a remote client reports them as a
//! [`DeliveryOutcome`](intake_sync_protocol::DeliveryOutcome). Everything
//! here is a local failure the caller has to act on.

use intake_storage::StorageError;
use intake_sync_protocol::{MutationId, MutationStatus, ProtocolError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in the sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The durable store could not record the change, so it did not happen.
    #[error("persistence failure: {0}")]
    Persistence(#[from] StorageError),

    /// The journal failed its integrity checks on load.
    #[error("journal corrupted at offset {offset}: {reason}")]
    Corrupted {
        /// Byte offset of the offending record.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// The mutation does not have the shape its kind requires.
    #[error("invalid mutation: {0}")]
    InvalidMutation(String),

    /// No queued mutation has this id.
    #[error("unknown mutation {0}")]
    UnknownMutation(MutationId),

    /// Discard and requeue only apply to terminally failed mutations.
    #[error("mutation {id} is {status:?}, only failed mutations can be discarded or requeued")]
    NotDiscardable {
        /// Mutation id.
        id: MutationId,
        /// Its current status.
        status: MutationStatus,
    },

    /// The background driver is not running.
    #[error("sync driver is not running")]
    NotRunning,

    /// Protocol or encoding error.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SyncError {
    /// Returns true if a write was refused because it could not be made
    /// durable. The UI must report such a write as not having happened.
    pub fn is_persistence_failure(&self) -> bool {
        matches!(self, SyncError::Persistence(_))
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidMutation(message) => SyncError::InvalidMutation(message),
            ProtocolError::Corrupted { offset, reason } => SyncError::Corrupted { offset, reason },
            other => SyncError::Protocol(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn persistence_failures() {
        let err = SyncError::from(StorageError::Io(io::Error::new(io::ErrorKind::Other, "disk full")));
        assert!(err.is_persistence_failure());
        assert!(err.to_string().contains("disk full"));
        assert!(!SyncError::NotRunning.is_persistence_failure());
    }

    #[test]
    fn protocol_errors_map_onto_engine_variants() {
        let err = SyncError::from(ProtocolError::invalid("email is required"));
        assert!(matches!(err, SyncError::InvalidMutation(ref m) if m == "email is required"));

        let err = SyncError::from(ProtocolError::Corrupted {
            offset: 12,
            reason: "bad magic".into(),
        });
        assert!(matches!(err, SyncError::Corrupted { offset: 12, .. }));
    }

    #[test]
    fn error_display() {
        let id = MutationId::new();
        let err = SyncError::NotDiscardable {
            id,
            status: MutationStatus::Pending,
        };
        assert!(err.to_string().contains(&id.to_string()));
        assert!(err.to_string().contains("Pending"));
    }
}
