//! CLI command implementations.

pub mod enqueue;
pub mod flush;
pub mod inspect;
pub mod resolve;
pub mod status;

use crate::error::CliError;
use crate::http::ReqwestClient;
use crate::Format;
use intake_storage::FileBackend;
use intake_sync_engine::{
    ConnectivityMonitor, HttpRemoteClient, JournalStore, SyncConfig, SyncEngine,
};
use intake_sync_protocol::{CandidateFields, Difficulty, EntityTarget, MutationId, Payload};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

/// Settings shared by every command.
pub struct Context {
    /// Journal path.
    pub queue: PathBuf,
    /// Remote API base URL.
    pub remote: String,
    /// Output format.
    pub format: Format,
}

/// How a command addresses an existing candidate.
pub struct Target {
    /// Natural key.
    pub email: Option<String>,
    /// Server id.
    pub remote_id: Option<i64>,
}

impl Target {
    pub(crate) fn into_entity_target(self) -> Result<EntityTarget, CliError> {
        match (self.remote_id, self.email) {
            (Some(id), Some(email)) => Ok(EntityTarget::by_natural_key(email).with_remote_id(id)),
            (Some(id), None) => Ok(EntityTarget::by_remote_id(id)),
            (None, Some(email)) => Ok(EntityTarget::by_natural_key(email)),
            (None, None) => Err(CliError::Usage("either --email or --id is required".into())),
        }
    }
}

impl Context {
    /// Opens the engine over the journal.
    ///
    /// Connectivity is reported as `online` for the lifetime of the command;
    /// local commands open offline so nothing is sent.
    pub(crate) fn open_engine(&self, online: bool) -> Result<SyncEngine, CliError> {
        let config = SyncConfig::new("intake-cli").with_flush_on_enqueue(false);
        let backend = FileBackend::open_with_create_dirs(&self.queue)?;
        let store = JournalStore::new(backend)
            .with_compaction_threshold(config.compaction_threshold);
        let client = ReqwestClient::new(config.request_timeout)?;
        let remote = HttpRemoteClient::new(self.remote.clone(), client);

        let connectivity = ConnectivityMonitor::new(online, config.connectivity_debounce);
        Ok(SyncEngine::open(config, store, remote, connectivity)?)
    }

    /// Prints `value` as JSON, or `text` in text mode.
    pub(crate) fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> Result<(), CliError> {
        match self.format {
            Format::Json => println!("{}", serde_json::to_string_pretty(value)?),
            Format::Text => println!("{}", text()),
        }
        Ok(())
    }
}

/// Parses a `key=value` assignment. The value is read as JSON when it parses
/// as JSON, so `hours=3` is a number and `categories=["ml"]` a list;
/// anything else is a string.
pub fn parse_assignment(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing field name in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Collects assignments into a payload; later ones win.
pub(crate) fn payload_from(assignments: Vec<(String, Value)>) -> Payload {
    assignments.into_iter().collect()
}

/// Builds create fields from command-line values.
pub fn candidate_fields(
    name: String,
    email: String,
    hours: i64,
    categories: Vec<String>,
    difficulty: &str,
) -> Result<CandidateFields, CliError> {
    let difficulty: Difficulty = difficulty
        .parse()
        .map_err(|e: intake_sync_protocol::ProtocolError| CliError::Usage(e.to_string()))?;
    Ok(CandidateFields::new(name, email)
        .with_test_duration_hours(hours)
        .with_categories(categories)
        .with_difficulty(difficulty))
}

pub(crate) fn parse_id(raw: &str) -> Result<MutationId, CliError> {
    raw.parse()
        .map_err(|_| CliError::Usage(format!("'{}' is not a mutation id", raw)))
}
