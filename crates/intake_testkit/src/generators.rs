//! Property-based test generators using proptest.
//!
//! Generated candidates always pass client-side validation, so properties
//! exercise queue and journal behavior rather than input rejection.

use intake_sync_protocol::{
    CandidateFields, Difficulty, EntityTarget, NewMutation, Payload, CANDIDATE,
};
use proptest::prelude::*;
use serde_json::Value;

/// Strategy for plausible, lowercase email addresses.
pub fn email_strategy() -> impl Strategy<Value = String> {
    ("[a-z][a-z0-9.]{0,11}", "[a-z]{2,8}", prop::sample::select(vec!["com", "org", "io"]))
        .prop_map(|(local, domain, tld)| format!("{}@{}.{}", local, domain, tld))
}

/// Strategy for candidate names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    "[A-Z][a-z]{1,9}( [A-Z][a-z]{1,11})?"
}

/// Strategy for difficulties.
pub fn difficulty_strategy() -> impl Strategy<Value = Difficulty> {
    prop_oneof![
        Just(Difficulty::Junior),
        Just(Difficulty::Mid),
        Just(Difficulty::Senior),
    ]
}

/// Strategy for complete candidate field sets.
pub fn candidate_fields_strategy() -> impl Strategy<Value = CandidateFields> {
    (
        name_strategy(),
        email_strategy(),
        1i64..=24,
        prop::collection::vec("[a-z]{2,10}", 0..4),
        difficulty_strategy(),
    )
        .prop_map(|(name, email, hours, categories, difficulty)| {
            CandidateFields::new(name, email)
                .with_test_duration_hours(hours)
                .with_categories(categories)
                .with_difficulty(difficulty)
        })
}

/// Strategy for partial update payloads (at least one field).
pub fn candidate_patch_strategy() -> impl Strategy<Value = Payload> {
    (
        prop::option::of(name_strategy()),
        prop::option::of(1i64..=24),
        prop::option::of(difficulty_strategy()),
    )
        .prop_map(|(name, hours, difficulty)| {
            let mut payload = Payload::new();
            if let Some(name) = name {
                payload.insert("name".into(), Value::String(name));
            }
            if let Some(hours) = hours {
                payload.insert("test_duration_hours".into(), Value::from(hours));
            }
            if let Some(difficulty) = difficulty {
                payload.insert("difficulty".into(), Value::String(difficulty.to_string()));
            }
            if payload.is_empty() {
                payload.insert("difficulty".into(), Value::String("mid".into()));
            }
            payload
        })
}

/// One step in a generated workload.
#[derive(Debug, Clone)]
pub enum MutationOp {
    /// Create a candidate with this email slot.
    Create {
        /// Index into the email pool.
        slot: usize,
        /// Fields to create with; the email is replaced by the slot's.
        fields: CandidateFields,
    },
    /// Update the candidate in this slot.
    Update {
        /// Index into the email pool.
        slot: usize,
        /// Changed fields.
        patch: Payload,
    },
    /// Delete the candidate in this slot.
    Delete {
        /// Index into the email pool.
        slot: usize,
    },
}

impl MutationOp {
    /// Builds the mutation, addressing candidates by `pool[slot]`.
    pub fn to_new_mutation(&self, pool: &[String]) -> NewMutation {
        let email = |slot: usize| pool[slot % pool.len()].clone();
        match self {
            MutationOp::Create { slot, fields } => {
                let mut fields = fields.clone();
                fields.email = email(*slot);
                NewMutation::create(CANDIDATE, fields.into_payload())
            }
            MutationOp::Update { slot, patch } => NewMutation::update(
                CANDIDATE,
                EntityTarget::by_natural_key(email(*slot)),
                patch.clone(),
            ),
            MutationOp::Delete { slot } => {
                NewMutation::delete(CANDIDATE, EntityTarget::by_natural_key(email(*slot)))
            }
        }
    }
}

/// Strategy for a single workload step over `slots` email slots.
pub fn mutation_op_strategy(slots: usize) -> impl Strategy<Value = MutationOp> {
    let slots = slots.max(1);
    prop_oneof![
        3 => (0..slots, candidate_fields_strategy())
            .prop_map(|(slot, fields)| MutationOp::Create { slot, fields }),
        2 => (0..slots, candidate_patch_strategy())
            .prop_map(|(slot, patch)| MutationOp::Update { slot, patch }),
        1 => (0..slots).prop_map(|slot| MutationOp::Delete { slot }),
    ]
}

/// Strategy for workloads of up to `max_len` steps over `slots` email slots.
pub fn mutation_ops_strategy(slots: usize, max_len: usize) -> impl Strategy<Value = Vec<MutationOp>> {
    prop::collection::vec(mutation_op_strategy(slots), 0..=max_len)
}
