//! `add`, `update` and `delete`: queue a candidate write.

use super::{payload_from, Context, Target};
use crate::error::CliError;
use intake_sync_protocol::{CandidateFields, NewMutation, CANDIDATE};
use serde_json::{json, Value};

fn queue(ctx: &Context, mutation: NewMutation) -> Result<(), CliError> {
    let engine = ctx.open_engine(false)?;
    let id = engine.enqueue(mutation)?;
    let pending = engine.get_state().pending_count;
    ctx.emit(&json!({"id": id, "pending": pending}), || {
        format!("queued {} ({} pending)", id, pending)
    })
}

/// Queues a candidate create.
pub fn add(ctx: &Context, fields: CandidateFields, key: Option<String>) -> Result<(), CliError> {
    let mut mutation = NewMutation::create(CANDIDATE, fields.into_payload());
    if let Some(key) = key {
        mutation = mutation.with_idempotency_key(key);
    }
    queue(ctx, mutation)
}

/// Queues a partial update.
pub fn update(ctx: &Context, target: Target, set: Vec<(String, Value)>) -> Result<(), CliError> {
    let mutation = NewMutation::update(CANDIDATE, target.into_entity_target()?, payload_from(set));
    queue(ctx, mutation)
}

/// Queues a delete.
pub fn delete(ctx: &Context, target: Target) -> Result<(), CliError> {
    queue(ctx, NewMutation::delete(CANDIDATE, target.into_entity_target()?))
}
