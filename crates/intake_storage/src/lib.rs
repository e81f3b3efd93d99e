//! # Intake Storage
//!
//! Byte-store backends underneath the offline write queue journal.
//!
//! Backends are **opaque byte stores**: they append, read back, flush and
//! atomically replace bytes. They know nothing about mutations or journal
//! records; the sync engine owns the record format.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral queues
//! - [`FileBackend`] - For on-device persistence, with an exclusive lock so
//!   only one engine owns a journal at a time
//!
//! ## Example
//!
//! ```rust
//! use intake_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
