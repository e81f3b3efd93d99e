//! # Intake Sync Server
//!
//! Reference "cloud" candidate store for the intake offline write queue.
//!
//! This crate provides:
//! - An in-memory candidate table with a case-insensitive unique `email`
//! - The candidate HTTP routes, served over transport-neutral
//!   [`HttpRequest`](intake_sync_protocol::HttpRequest) values
//! - Fault injection (`503` responses) for retry testing
//!
//! # Routes
//!
//! | Method | Path | Result |
//! |--------|------|--------|
//! | `GET` | `/candidates?skip&limit` | newest first |
//! | `POST` | `/candidates` | `400 "Email already registered"` on duplicate |
//! | `GET` | `/candidates/{id}` | `404 "Candidate not found"` if missing |
//! | `GET` | `/candidates/by-email/{email}` | lookup by natural key |
//! | `PUT` | `/candidates/{id}` | partial update |
//! | `DELETE` | `/candidates/{id}` | `{"message": "Candidate deleted"}` |
//!
//! Any path prefix before `candidates` is ignored, so a base URL such as
//! `https://host/api` routes the same way.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod server;
mod store;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::RequestHandler;
pub use server::SyncServer;
pub use store::{Candidate, CandidatePatch, CandidateStore};
