//! Delivery outcomes reported by a remote client.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why the remote store refused a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RejectionKind {
    /// A unique constraint was violated (duplicate email).
    UniqueViolation {
        /// The constrained field.
        field: String,
    },
    /// The payload failed server-side validation.
    Validation,
    /// The targeted entity does not exist.
    NotFound,
    /// Any other non-retryable refusal.
    Other,
}

/// A permanent refusal, carried on the failed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Classification.
    pub kind: RejectionKind,
    /// Server-provided detail.
    pub reason: String,
}

impl Rejection {
    /// A unique-constraint violation on `field`.
    pub fn unique_violation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind: RejectionKind::UniqueViolation {
                field: field.into(),
            },
            reason: reason.into(),
        }
    }

    /// A validation failure.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self {
            kind: RejectionKind::Validation,
            reason: reason.into(),
        }
    }

    /// A missing target.
    pub fn not_found(reason: impl Into<String>) -> Self {
        Self {
            kind: RejectionKind::NotFound,
            reason: reason.into(),
        }
    }

    /// Any other refusal.
    pub fn other(reason: impl Into<String>) -> Self {
        Self {
            kind: RejectionKind::Other,
            reason: reason.into(),
        }
    }

    /// Returns true for unique-constraint violations.
    ///
    /// The UI offers merge/edit for these rather than fix-and-resubmit.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, RejectionKind::UniqueViolation { .. })
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RejectionKind::UniqueViolation { field } => {
                write!(f, "duplicate {}: {}", field, self.reason)
            }
            RejectionKind::Validation => write!(f, "validation failed: {}", self.reason),
            RejectionKind::NotFound => write!(f, "not found: {}", self.reason),
            RejectionKind::Other => write!(f, "rejected: {}", self.reason),
        }
    }
}

/// Normalized result of one delivery attempt.
///
/// Remote clients must map every transport or server response onto one of
/// these three cases; the engine's retry policy depends on nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The remote store applied the mutation.
    Delivered {
        /// Key assigned by the server for a create, if reported.
        remote_id: Option<i64>,
    },
    /// Network error, timeout or server unavailability; retry later.
    Transient {
        /// Diagnostic detail.
        reason: String,
    },
    /// The server refused the mutation; retrying unchanged cannot succeed.
    Rejected(Rejection),
}

impl DeliveryOutcome {
    /// A successful delivery with no reported key.
    pub fn delivered() -> Self {
        Self::Delivered { remote_id: None }
    }

    /// A transient failure.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }
}
