//! `discard` and `requeue`: operator resolution of rejected mutations.

use super::{parse_id, payload_from, Context};
use crate::error::CliError;
use serde_json::{json, Value};

/// Drops a rejected mutation.
pub fn discard(ctx: &Context, raw_id: &str) -> Result<(), CliError> {
    let id = parse_id(raw_id)?;
    let engine = ctx.open_engine(false)?;
    let removed = engine.discard(id)?;
    ctx.emit(&json!({"discarded": removed}), || {
        format!("discarded {} ({})", id, removed.describe())
    })
}

/// Puts a rejected mutation back in line.
pub fn requeue(ctx: &Context, raw_id: &str, set: Vec<(String, Value)>) -> Result<(), CliError> {
    let id = parse_id(raw_id)?;
    let changes = (!set.is_empty()).then(|| payload_from(set));
    let engine = ctx.open_engine(false)?;
    engine.requeue(id, changes)?;
    ctx.emit(&json!({"requeued": id}), || format!("requeued {}", id))
}
