//! `flush`: deliver the queue to the remote API.

use super::Context;
use crate::error::CliError;
use intake_sync_engine::FlushReport;
use tracing::info;

/// Runs up to `rounds` flush passes, sleeping out backoff between them.
pub async fn run(ctx: &Context, rounds: u32) -> Result<(), CliError> {
    let engine = ctx.open_engine(true)?;
    info!(remote = %ctx.remote, "flushing queue");

    let mut report = FlushReport::default();
    for round in 0..rounds.max(1) {
        if round > 0 {
            match engine.next_retry_at() {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => break,
            }
        }
        report += engine.flush().await;
        if engine.get_state().pending_count == 0 {
            break;
        }
    }

    let state = engine.get_state();
    ctx.emit(&serde_json::json!({"report": report, "state": state}), || {
        format!(
            "delivered {}, rejected {}, transient {}, skipped {}\nstatus: {} ({} pending)",
            report.delivered,
            report.rejected,
            report.transient,
            report.skipped,
            state.status,
            state.pending_count
        )
    })
}
