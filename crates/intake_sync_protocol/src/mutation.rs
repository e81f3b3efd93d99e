//! Queued write intents.

use crate::outcome::Rejection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The field set a mutation applies, as a JSON object.
pub type Payload = Map<String, Value>;

/// Field whose value doubles as the natural key of an entity.
const NATURAL_KEY_FIELD: &str = "email";

/// Locally generated mutation identifier.
///
/// Stable across retries and reloads; never the remote primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationId(Uuid);

impl MutationId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for MutationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// What a mutation does to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// Insert a new entity.
    Create,
    /// Change fields of an existing entity.
    Update,
    /// Remove an entity.
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Delivery state of a mutation.
///
/// Transitions are `Pending -> InFlight -> {Done | Pending | Failed}`.
/// `Failed` is terminal until an operator discards or requeues it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    /// Waiting for delivery (possibly after transient failures).
    #[default]
    Pending,
    /// A delivery attempt is outstanding.
    InFlight,
    /// Permanently rejected by the remote store.
    Failed,
    /// Confirmed by the remote store.
    Done,
}

impl MutationStatus {
    /// Returns true if the mutation still counts toward the pending total.
    pub fn is_outstanding(&self) -> bool {
        !matches!(self, MutationStatus::Done)
    }
}

/// Which entity a mutation refers to.
///
/// `remote_id` is the server-assigned key once known; `natural_key` is the
/// unique business key (the candidate email) usable before then.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntityTarget {
    /// Server-assigned primary key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<i64>,
    /// Unique natural key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natural_key: Option<String>,
}

impl EntityTarget {
    /// Targets an entity by its remote key.
    pub fn by_remote_id(remote_id: i64) -> Self {
        Self {
            remote_id: Some(remote_id),
            natural_key: None,
        }
    }

    /// Targets an entity by its natural key.
    pub fn by_natural_key(key: impl Into<String>) -> Self {
        Self {
            remote_id: None,
            natural_key: Some(key.into()),
        }
    }

    /// Adds a remote key.
    pub fn with_remote_id(mut self, remote_id: i64) -> Self {
        self.remote_id = Some(remote_id);
        self
    }

    /// Returns true if neither key is set.
    pub fn is_empty(&self) -> bool {
        self.remote_id.is_none() && self.natural_key().is_none()
    }

    /// Returns the trimmed natural key, if any.
    pub fn natural_key(&self) -> Option<&str> {
        self.natural_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

/// Identity of the chain of mutations touching one logical entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineageKey(String);

impl LineageKey {
    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LineageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single queued write intent.
///
/// Fields this build does not know about are kept in `extra` and written
/// back unchanged, so a queue written by a newer client survives a round
/// trip through an older one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// Local identifier.
    pub id: MutationId,
    /// Caller-supplied deduplication key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Operation kind.
    pub kind: MutationKind,
    /// Logical resource name, e.g. `candidate`.
    pub entity_type: String,
    /// Entity the mutation applies to.
    #[serde(default)]
    pub target: EntityTarget,
    /// Fields to apply.
    #[serde(default)]
    pub payload: Payload,
    /// Delivery attempts made so far.
    #[serde(default)]
    pub attempt: u32,
    /// Logical enqueue timestamp; strictly increasing per queue.
    pub created_at: u64,
    /// Delivery state.
    #[serde(default)]
    pub status: MutationStatus,
    /// Why the remote store refused the mutation, when `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<Rejection>,
    /// Unknown fields preserved across versions.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Mutation {
    /// Returns the lineage this mutation belongs to.
    ///
    /// Mutations are grouped by natural key when known (case-insensitive),
    /// else by remote key. A mutation with neither is its own lineage.
    pub fn lineage(&self) -> LineageKey {
        if let Some(key) = self.target.natural_key() {
            LineageKey(format!("{}:{}", self.entity_type, key.to_lowercase()))
        } else if let Some(remote_id) = self.target.remote_id {
            LineageKey(format!("{}#{}", self.entity_type, remote_id))
        } else {
            LineageKey(format!("{}@{}", self.entity_type, self.id))
        }
    }

    /// Returns the lineage key an update moves its entity to.
    ///
    /// An update whose payload sets a different `email` renames the
    /// entity's natural key; later mutations addressed by the new email
    /// still belong to this mutation's lineage.
    pub fn renamed_lineage(&self) -> Option<LineageKey> {
        if self.kind != MutationKind::Update {
            return None;
        }
        let email = self
            .payload
            .get(NATURAL_KEY_FIELD)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|e| !e.is_empty())?;
        let renamed = LineageKey(format!("{}:{}", self.entity_type, email.to_lowercase()));
        (renamed != self.lineage()).then_some(renamed)
    }

    /// Returns true if the mutation was permanently rejected.
    pub fn is_failed(&self) -> bool {
        self.status == MutationStatus::Failed
    }

    /// Short human-readable label for logs and listings.
    pub fn describe(&self) -> String {
        match (self.target.natural_key(), self.target.remote_id) {
            (Some(key), _) => format!("{} {} {}", self.kind, self.entity_type, key),
            (None, Some(id)) => format!("{} {} #{}", self.kind, self.entity_type, id),
            (None, None) => format!("{} {}", self.kind, self.entity_type),
        }
    }
}

/// A mutation as submitted by the UI, before the queue assigns an id and
/// timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMutation {
    /// Caller-chosen id; generated when absent.
    pub id: Option<MutationId>,
    /// Deduplication key.
    pub idempotency_key: Option<String>,
    /// Operation kind.
    pub kind: MutationKind,
    /// Logical resource name.
    pub entity_type: String,
    /// Entity the mutation applies to.
    pub target: EntityTarget,
    /// Fields to apply.
    pub payload: Payload,
}

impl NewMutation {
    /// A create; the natural key is taken from the payload's `email`.
    pub fn create(entity_type: impl Into<String>, payload: Payload) -> Self {
        Self::new(MutationKind::Create, entity_type, EntityTarget::default(), payload)
    }

    /// An update of the targeted entity.
    pub fn update(entity_type: impl Into<String>, target: EntityTarget, payload: Payload) -> Self {
        Self::new(MutationKind::Update, entity_type, target, payload)
    }

    /// A delete of the targeted entity.
    pub fn delete(entity_type: impl Into<String>, target: EntityTarget) -> Self {
        Self::new(MutationKind::Delete, entity_type, target, Payload::new())
    }

    fn new(
        kind: MutationKind,
        entity_type: impl Into<String>,
        target: EntityTarget,
        payload: Payload,
    ) -> Self {
        Self {
            id: None,
            idempotency_key: None,
            kind,
            entity_type: entity_type.into(),
            target,
            payload,
        }
    }

    /// Sets the deduplication key.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Sets an explicit mutation id.
    pub fn with_id(mut self, id: MutationId) -> Self {
        self.id = Some(id);
        self
    }

    /// Builds the queued mutation.
    ///
    /// A create without an explicit natural key adopts the payload's
    /// `email`.
    pub fn into_mutation(self, id: MutationId, created_at: u64) -> Mutation {
        let mut target = self.target;
        if self.kind == MutationKind::Create && target.natural_key().is_none() {
            if let Some(email) = self.payload.get(NATURAL_KEY_FIELD).and_then(Value::as_str) {
                target.natural_key = Some(email.trim().to_string());
            }
        }

        Mutation {
            id,
            idempotency_key: self.idempotency_key,
            kind: self.kind,
            entity_type: self.entity_type,
            target,
            payload: self.payload,
            attempt: 0,
            created_at,
            status: MutationStatus::Pending,
            rejection: None,
            extra: Map::new(),
        }
    }
}
