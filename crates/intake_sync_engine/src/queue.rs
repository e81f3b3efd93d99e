//! In-memory mutation queue.
//!
//! Holds the rehydrated queue in creation order and decides which
//! mutations a flush may attempt. Persistence is the engine's job; the
//! queue never touches the durable store.

use intake_sync_protocol::{LineageKey, Mutation, MutationId, MutationStatus, NewMutation};
use std::collections::{HashMap, HashSet};
use tokio::time::Instant;

/// Mutations a flush pass may attempt, in delivery order.
#[derive(Debug, Default)]
pub struct FlushPlan {
    /// Eligible mutations with their resolved lineage. A lineage
    /// contributes its pending prefix.
    pub ready: Vec<(LineageKey, Mutation)>,
    /// Pending mutations held back by backoff or an earlier failure in
    /// their lineage.
    pub skipped: usize,
}

/// Ordered queue of outstanding mutations.
#[derive(Debug, Default)]
pub struct MutationQueue {
    entries: Vec<Mutation>,
    next_seq: u64,
    retry_after: HashMap<MutationId, Instant>,
    unsaved: HashSet<MutationId>,
}

impl MutationQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_seq: 1,
            retry_after: HashMap::new(),
            unsaved: HashSet::new(),
        }
    }

    /// Rebuilds the queue from loaded mutations.
    ///
    /// An `InFlight` mutation was interrupted mid-delivery and goes back to
    /// `Pending`; whether the server applied it is unknown, so it is retried
    /// and the interrupted attempt counts.
    pub fn from_loaded(mut mutations: Vec<Mutation>) -> Self {
        for m in &mut mutations {
            if m.status == MutationStatus::InFlight {
                m.status = MutationStatus::Pending;
                m.attempt = m.attempt.saturating_add(1);
            }
        }
        mutations.sort_by_key(|m| m.created_at);
        let next_seq = mutations.last().map_or(1, |m| m.created_at + 1);
        Self {
            entries: mutations,
            next_seq,
            retry_after: HashMap::new(),
            unsaved: HashSet::new(),
        }
    }

    /// Number of entries, delivered-but-unpurged ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the queue holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of mutations not yet confirmed.
    pub fn outstanding_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|m| m.status.is_outstanding())
            .count()
    }

    /// Iterates entries in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Mutation> {
        self.entries.iter()
    }

    /// Looks up a mutation.
    pub fn get(&self, id: &MutationId) -> Option<&Mutation> {
        self.entries.iter().find(|m| m.id == *id)
    }

    pub(crate) fn get_mut(&mut self, id: &MutationId) -> Option<&mut Mutation> {
        self.entries.iter_mut().find(|m| m.id == *id)
    }

    /// Returns the id of an outstanding entry this submission duplicates,
    /// matched by explicit id or idempotency key.
    pub fn find_duplicate(&self, new: &NewMutation) -> Option<MutationId> {
        self.entries
            .iter()
            .filter(|m| m.status.is_outstanding())
            .find(|m| {
                new.id == Some(m.id)
                    || (new.idempotency_key.is_some()
                        && new.idempotency_key == m.idempotency_key)
            })
            .map(|m| m.id)
    }

    /// Reserves the next creation timestamp.
    pub fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Appends a mutation at the tail.
    pub fn push(&mut self, mutation: Mutation) {
        self.next_seq = self.next_seq.max(mutation.created_at + 1);
        self.entries.push(mutation);
    }

    /// Replaces an entry in place, keeping its position.
    pub fn replace(&mut self, mutation: Mutation) -> bool {
        match self.get_mut(&mutation.id) {
            Some(slot) => {
                *slot = mutation;
                true
            }
            None => false,
        }
    }

    /// Removes an entry.
    pub fn remove(&mut self, id: &MutationId) -> Option<Mutation> {
        self.retry_after.remove(id);
        self.unsaved.remove(id);
        let index = self.entries.iter().position(|m| m.id == *id)?;
        Some(self.entries.remove(index))
    }

    /// Ids of entries confirmed by the remote store but not yet purged.
    pub fn done_ids(&self) -> Vec<MutationId> {
        self.entries
            .iter()
            .filter(|m| m.status == MutationStatus::Done)
            .map(|m| m.id)
            .collect()
    }

    /// Terminally failed entries.
    pub fn failed(&self) -> impl Iterator<Item = &Mutation> {
        self.entries.iter().filter(|m| m.is_failed())
    }

    /// Rejection text of the most recently created failed mutation.
    pub fn latest_rejection(&self) -> Option<String> {
        self.failed()
            .last()
            .map(|m| match &m.rejection {
                Some(rejection) => rejection.to_string(),
                None => format!("{} was rejected", m.describe()),
            })
    }

    /// Resolves the lineage of every entry, in creation order.
    ///
    /// An update that changes the email carries its lineage over to the
    /// new email, so later mutations addressed by either email stay in one
    /// chain.
    fn lineages(&self) -> Vec<LineageKey> {
        let mut renamed: HashMap<LineageKey, LineageKey> = HashMap::new();
        self.entries
            .iter()
            .map(|m| {
                let own = m.lineage();
                let lineage = renamed.get(&own).cloned().unwrap_or(own);
                if let Some(new_key) = m.renamed_lineage() {
                    renamed.insert(new_key, lineage.clone());
                }
                lineage
            })
            .collect()
    }

    /// Returns the resolved lineage of an entry.
    pub fn lineage_of(&self, id: &MutationId) -> Option<LineageKey> {
        let index = self.entries.iter().position(|m| m.id == *id)?;
        self.lineages().into_iter().nth(index)
    }

    /// Selects what a flush at `now` may attempt.
    ///
    /// Walks the queue in creation order. A lineage stops contributing at
    /// its first failed, in-flight or backing-off mutation, so nothing is
    /// ever sent ahead of an unconfirmed predecessor.
    pub fn plan(&self, now: Instant) -> FlushPlan {
        let mut plan = FlushPlan::default();
        let mut blocked: HashSet<LineageKey> = HashSet::new();

        for (m, lineage) in self.entries.iter().zip(self.lineages()) {
            match m.status {
                MutationStatus::Done => {}
                MutationStatus::Failed | MutationStatus::InFlight => {
                    blocked.insert(lineage);
                }
                MutationStatus::Pending => {
                    if blocked.contains(&lineage) {
                        plan.skipped += 1;
                    } else if self.retry_after.get(&m.id).is_some_and(|at| *at > now) {
                        blocked.insert(lineage);
                        plan.skipped += 1;
                    } else {
                        plan.ready.push((lineage, m.clone()));
                    }
                }
            }
        }

        plan
    }

    /// Holds a mutation back until `at`.
    pub fn set_retry_after(&mut self, id: MutationId, at: Instant) {
        self.retry_after.insert(id, at);
    }

    /// Drops every backoff deadline.
    pub fn clear_backoff(&mut self) {
        self.retry_after.clear();
    }

    /// Earliest backoff deadline that would unblock a lineage.
    ///
    /// Deadlines behind a failed predecessor are ignored: expiring them
    /// makes nothing eligible.
    pub fn earliest_retry(&self) -> Option<Instant> {
        let mut blocked: HashSet<LineageKey> = HashSet::new();
        let mut earliest: Option<Instant> = None;

        for (m, lineage) in self.entries.iter().zip(self.lineages()) {
            match m.status {
                MutationStatus::Done => {}
                MutationStatus::Failed | MutationStatus::InFlight => {
                    blocked.insert(lineage);
                }
                MutationStatus::Pending => {
                    if blocked.contains(&lineage) {
                        continue;
                    }
                    if let Some(at) = self.retry_after.get(&m.id) {
                        earliest = Some(earliest.map_or(*at, |e| e.min(*at)));
                        blocked.insert(lineage);
                    }
                }
            }
        }

        earliest
    }

    /// Fills in the server key on later mutations of a lineage.
    ///
    /// Returns the entries that changed so they can be persisted.
    pub fn adopt_remote_id(&mut self, lineage: &LineageKey, remote_id: i64) -> Vec<Mutation> {
        let lineages = self.lineages();
        let mut changed = Vec::new();
        for (m, resolved) in self.entries.iter_mut().zip(lineages) {
            if m.status.is_outstanding() && m.target.remote_id.is_none() && resolved == *lineage {
                m.target.remote_id = Some(remote_id);
                changed.push(m.clone());
            }
        }
        changed
    }

    /// Returns every `InFlight` entry to `Pending`, counting the attempt.
    ///
    /// Used when a delivery was abandoned without an outcome.
    pub fn reset_in_flight(&mut self) -> Vec<Mutation> {
        let mut reset = Vec::new();
        for m in &mut self.entries {
            if m.status == MutationStatus::InFlight {
                m.status = MutationStatus::Pending;
                m.attempt = m.attempt.saturating_add(1);
                reset.push(m.clone());
            }
        }
        reset
    }

    /// Records that an entry's latest state is not in the durable store.
    pub fn mark_unsaved(&mut self, id: MutationId) {
        self.unsaved.insert(id);
    }

    /// Takes the entries whose latest state still needs persisting.
    pub fn take_unsaved(&mut self) -> Vec<Mutation> {
        let ids: Vec<MutationId> = self.unsaved.drain().collect();
        ids.iter().filter_map(|id| self.get(id).cloned()).collect()
    }
}
