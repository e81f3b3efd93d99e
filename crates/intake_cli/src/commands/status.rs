//! `status` and `list`.

use super::Context;
use crate::error::CliError;
use intake_sync_protocol::Mutation;
use serde_json::json;

/// Shows the persisted sync state.
pub fn status(ctx: &Context) -> Result<(), CliError> {
    let engine = ctx.open_engine(false)?;
    let state = engine.get_state();
    let failed = engine.failed().len();

    ctx.emit(&json!({"state": state, "failed": failed}), || {
        let mut out = format!(
            "status:  {}\npending: {}\nfailed:  {}",
            state.status, state.pending_count, failed
        );
        if let Some(err) = &state.last_error {
            out.push_str(&format!("\nlast error: {}", err));
        }
        out
    })
}

/// Lists queued mutations in delivery order.
pub fn list(ctx: &Context, failed_only: bool) -> Result<(), CliError> {
    let engine = ctx.open_engine(false)?;
    let mutations: Vec<Mutation> = if failed_only {
        engine.failed()
    } else {
        engine.mutations()
    };

    ctx.emit(&mutations, || {
        if mutations.is_empty() {
            return "queue is empty".to_string();
        }
        mutations
            .iter()
            .map(|m| {
                let mut line = format!(
                    "{}  {:<8} {:<40} attempts={}",
                    m.id,
                    format!("{:?}", m.status).to_lowercase(),
                    m.describe(),
                    m.attempt
                );
                if let Some(rejection) = &m.rejection {
                    line.push_str(&format!("\n    {}", rejection));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    })
}
