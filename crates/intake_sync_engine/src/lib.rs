//! # Intake Sync Engine
//!
//! Offline-first write queue for candidate intake.
//!
//! This crate provides:
//! - [`SyncEngine`], the single owner of the mutation queue and its status
//! - [`JournalStore`], crash-safe persistence of the queue
//! - [`ConnectivityMonitor`], a debounced online/offline signal
//! - [`RemoteClient`] and its HTTP implementation
//! - A background driver that flushes on reconnect, enqueue and backoff expiry
//!
//! ## Architecture
//!
//! UI action → [`SyncEngine::enqueue`] → durable append → delivery via
//! [`RemoteClient`] when online. Outcomes are three-way:
//!
//! 1. Delivered: the mutation leaves the queue
//! 2. Transient: retried with capped, jittered exponential backoff
//! 3. Rejected: kept as failed until an operator discards or requeues it
//!
//! ## Key Invariants
//!
//! - A mutation is durable before `enqueue` returns its id
//! - Mutations of one lineage are delivered in creation order
//! - A failed lineage never blocks an unrelated one
//! - At most one flush runs at a time; overlapping requests coalesce

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod connectivity;
mod driver;
mod engine;
mod error;
mod http;
mod queue;
mod remote;
mod status;
mod store;

pub use config::{Jitter, RetryConfig, SyncConfig};
pub use connectivity::ConnectivityMonitor;
pub use driver::DriverHandle;
pub use engine::{FlushReport, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use http::{classify_response, HttpClient, HttpRemoteClient, LoopbackClient, LoopbackServer};
pub use queue::{FlushPlan, MutationQueue};
pub use remote::{MockRemote, RemoteClient};
pub use status::{DisplayStatus, StatusObserver, Subscription, SyncState, SyncStatus};
pub use store::{DurableStore, JournalStats, JournalStore, MemoryStore};
