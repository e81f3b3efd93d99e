//! # Intake Testkit
//!
//! Test utilities for the intake offline write queue.
//!
//! This crate provides:
//! - A storage backend that simulates crashes mid-write and failing fsync
//! - Property-based generators for candidate payloads and mutations
//! - Fixtures for temporary on-disk journals and common mutations
//!
//! ## Usage
//!
//! ```rust
//! use intake_storage::{InMemoryBackend, StorageBackend};
//! use intake_testkit::CrashableBackend;
//!
//! let disk = InMemoryBackend::new();
//! let mut backend = CrashableBackend::new(Box::new(disk.clone()));
//! let control = backend.control();
//!
//! control.crash_after(4);
//! assert!(backend.append(b"journal record").is_err());
//! assert_eq!(disk.bytes(), b"jour");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::{CrashControl, CrashableBackend};
pub use fixtures::*;
pub use generators::*;
