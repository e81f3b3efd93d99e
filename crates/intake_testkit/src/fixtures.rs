//! Test fixtures and journal helpers.

use intake_storage::{FileBackend, StorageResult};
use intake_sync_protocol::{CandidateFields, EntityTarget, NewMutation, Payload, CANDIDATE};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A journal path inside a temporary directory, removed on drop.
pub struct TempJournal {
    path: PathBuf,
    _temp_dir: TempDir,
}

impl TempJournal {
    /// Creates a fresh temporary directory for a journal.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("queue.journal");
        Self {
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the journal file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens (and locks) the journal file.
    pub fn open(&self) -> StorageResult<FileBackend> {
        FileBackend::open(&self.path)
    }

    /// Returns the raw journal bytes, or nothing if it does not exist yet.
    pub fn bytes(&self) -> Vec<u8> {
        std::fs::read(&self.path).unwrap_or_default()
    }
}

impl Default for TempJournal {
    fn default() -> Self {
        Self::new()
    }
}

/// A candidate create with default test settings.
pub fn candidate(name: &str, email: &str) -> NewMutation {
    NewMutation::create(CANDIDATE, CandidateFields::new(name, email).into_payload())
}

/// An update addressed by email.
pub fn update_by_email(email: &str, changes: Value) -> NewMutation {
    let payload = match changes {
        Value::Object(map) => map,
        _ => Payload::new(),
    };
    NewMutation::update(CANDIDATE, EntityTarget::by_natural_key(email), payload)
}

/// A delete addressed by email.
pub fn delete_by_email(email: &str) -> NewMutation {
    NewMutation::delete(CANDIDATE, EntityTarget::by_natural_key(email))
}

/// `count` distinct emails: `candidate0@example.com`, ...
pub fn email_pool(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("candidate{}@example.com", i))
        .collect()
}
