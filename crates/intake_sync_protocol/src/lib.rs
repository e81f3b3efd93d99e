//! # Intake Sync Protocol
//!
//! Data types shared by the offline write queue and the remote API.
//!
//! This crate provides:
//! - [`Mutation`], the durable unit of queued write intent
//! - [`DeliveryOutcome`] and [`Rejection`], the three-way delivery result
//! - Candidate field validation mirroring the remote schema
//! - The journal record framing used to persist the queue
//! - HTTP-shaped request/response values shared with the reference server
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod candidate;
mod error;
pub mod journal;
mod mutation;
mod outcome;
pub mod wire;

pub use candidate::{
    is_plausible_email, validate_candidate_payload, CandidateFields, Difficulty, CANDIDATE,
    DEFAULT_DURATION_HOURS,
};
pub use error::{ProtocolError, ProtocolResult};
pub use journal::{JournalRecord, JournalScan, JOURNAL_MAGIC, JOURNAL_VERSION, MAX_RECORD_LEN};
pub use mutation::{
    EntityTarget, LineageKey, Mutation, MutationId, MutationKind, MutationStatus, NewMutation,
    Payload,
};
pub use outcome::{DeliveryOutcome, Rejection, RejectionKind};
pub use wire::{ErrorBody, HttpMethod, HttpRequest, HttpResponse};
