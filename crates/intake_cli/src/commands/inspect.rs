//! `inspect`: journal statistics.

use super::Context;
use crate::error::CliError;
use intake_storage::FileBackend;
use intake_sync_engine::{DurableStore, JournalStore};
use intake_sync_protocol::MutationStatus;
use serde::Serialize;

/// Journal inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Journal path.
    pub path: String,
    /// Size in bytes.
    pub bytes: u64,
    /// Records on disk, superseded ones included.
    pub records: usize,
    /// Mutations the records replay to.
    pub live: usize,
    /// Live mutations awaiting delivery.
    pub pending: usize,
    /// Live mutations rejected by the server.
    pub failed: usize,
}

/// Runs the inspect command.
pub fn run(ctx: &Context) -> Result<(), CliError> {
    if !ctx.queue.exists() {
        return Err(CliError::Usage(format!(
            "no queue journal at {}",
            ctx.queue.display()
        )));
    }

    let mut store = JournalStore::new(FileBackend::open(&ctx.queue)?).with_compaction_threshold(0);
    let live = store.load()?;
    let stats = store.stats()?;

    let result = InspectResult {
        path: ctx.queue.display().to_string(),
        bytes: stats.bytes,
        records: stats.records,
        live: stats.live,
        pending: live
            .iter()
            .filter(|m| matches!(m.status, MutationStatus::Pending | MutationStatus::InFlight))
            .count(),
        failed: live.iter().filter(|m| m.is_failed()).count(),
    };

    ctx.emit(&result, || {
        format!(
            "journal: {}\nsize:    {} bytes\nrecords: {} ({} superseded)\nlive:    {} ({} pending, {} failed)",
            result.path,
            result.bytes,
            result.records,
            result.records.saturating_sub(result.live),
            result.live,
            result.pending,
            result.failed
        )
    })
}
