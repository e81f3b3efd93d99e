//! Durable persistence of the mutation queue.
//!
//! [`JournalStore`] writes one framed record per change and syncs before
//! returning, so a call that succeeded survives a crash. On load it
//! replays the journal, cuts off a torn trailing record, and rewrites the
//! file once enough dead records have accumulated.

use crate::error::{SyncError, SyncResult};
use intake_storage::{StorageBackend, StorageError};
use intake_sync_protocol::{JournalRecord, JournalScan, Mutation, MutationId};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Crash-safe persistence for queued mutations.
///
/// Every write is durable before it returns `Ok`. Only the sync engine
/// calls these methods.
pub trait DurableStore: Send {
    /// Returns the persisted queue in creation order.
    fn load(&mut self) -> SyncResult<Vec<Mutation>>;

    /// Persists a new mutation.
    fn append(&mut self, mutation: &Mutation) -> SyncResult<()>;

    /// Persists a changed mutation.
    fn update(&mut self, mutation: &Mutation) -> SyncResult<()>;

    /// Persists the removal of a mutation.
    fn remove(&mut self, id: &MutationId) -> SyncResult<()>;

    /// Reclaims space held by superseded records.
    fn compact(&mut self) -> SyncResult<()> {
        Ok(())
    }
}

/// Size information about a journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalStats {
    /// Records in the journal, superseded ones included.
    pub records: usize,
    /// Mutations the records replay to.
    pub live: usize,
    /// Journal size in bytes.
    pub bytes: u64,
}

const DEFAULT_COMPACTION_THRESHOLD: usize = 256;

/// A [`DurableStore`] over an append-only journal.
pub struct JournalStore<B: StorageBackend> {
    backend: B,
    live: Vec<Mutation>,
    records: usize,
    compaction_threshold: usize,
}

impl<B: StorageBackend> JournalStore<B> {
    /// Creates a store over `backend`. Call [`DurableStore::load`] before
    /// writing.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            live: Vec::new(),
            records: 0,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        }
    }

    /// Sets how many dead records trigger a rewrite. Zero disables it.
    pub fn with_compaction_threshold(mut self, threshold: usize) -> Self {
        self.compaction_threshold = threshold;
        self
    }

    /// Returns journal statistics.
    pub fn stats(&self) -> SyncResult<JournalStats> {
        Ok(JournalStats {
            records: self.records,
            live: self.live.len(),
            bytes: self.backend.size()?,
        })
    }

    /// Returns the backend.
    pub fn into_backend(self) -> B {
        self.backend
    }

    fn write(&mut self, record: &JournalRecord) -> SyncResult<()> {
        let bytes = record.encode()?;
        let before = self.backend.size()?;

        let written = self
            .backend
            .append(&bytes)
            .and_then(|_| self.backend.flush())
            .and_then(|_| self.backend.sync());

        if let Err(err) = written {
            // Later records must not land behind a half-written one.
            if let Err(rollback) = self.backend.truncate(before) {
                warn!(error = %rollback, "failed to roll back partial journal write");
            }
            return Err(err.into());
        }

        self.records += 1;
        Ok(())
    }

    fn dead_records(&self) -> usize {
        self.records.saturating_sub(self.live.len())
    }

    fn after_write(&mut self) {
        let result = if self.live.is_empty() && self.records > 0 {
            self.reset()
        } else if self.compaction_threshold > 0 && self.dead_records() >= self.compaction_threshold
        {
            self.compact()
        } else {
            Ok(())
        };

        // The write itself is already durable; a failed cleanup only costs space.
        if let Err(err) = result {
            warn!(error = %err, "journal cleanup failed");
        }
    }

    fn reset(&mut self) -> SyncResult<()> {
        self.backend.truncate(0)?;
        self.backend.sync()?;
        self.records = 0;
        debug!("journal emptied");
        Ok(())
    }

    fn position(&self, id: &MutationId) -> Option<usize> {
        self.live.iter().position(|m| m.id == *id)
    }
}

impl<B: StorageBackend> DurableStore for JournalStore<B> {
    fn load(&mut self) -> SyncResult<Vec<Mutation>> {
        let bytes = self.backend.read_all()?;
        let scan = JournalScan::decode(&bytes)?;

        if scan.torn_tail {
            warn!(
                valid_len = scan.valid_len,
                size = bytes.len(),
                "truncating torn journal tail"
            );
            self.backend.truncate(scan.valid_len)?;
            self.backend.sync()?;
        }

        let mut live: Vec<Mutation> = Vec::new();
        for record in &scan.records {
            match record {
                JournalRecord::Append(m) | JournalRecord::Update(m) => {
                    match live.iter_mut().find(|l| l.id == m.id) {
                        Some(slot) => *slot = m.clone(),
                        None => live.push(m.clone()),
                    }
                }
                JournalRecord::Remove(id) => live.retain(|l| l.id != *id),
            }
        }

        self.records = scan.records.len();
        self.live = live;
        info!(
            records = self.records,
            live = self.live.len(),
            "journal loaded"
        );

        if self.compaction_threshold > 0 && self.dead_records() >= self.compaction_threshold {
            self.compact()?;
        }

        Ok(self.live.clone())
    }

    fn append(&mut self, mutation: &Mutation) -> SyncResult<()> {
        self.write(&JournalRecord::Append(mutation.clone()))?;
        self.live.push(mutation.clone());
        Ok(())
    }

    fn update(&mut self, mutation: &Mutation) -> SyncResult<()> {
        let index = self
            .position(&mutation.id)
            .ok_or(SyncError::UnknownMutation(mutation.id))?;
        self.write(&JournalRecord::Update(mutation.clone()))?;
        self.live[index] = mutation.clone();
        self.after_write();
        Ok(())
    }

    fn remove(&mut self, id: &MutationId) -> SyncResult<()> {
        let Some(index) = self.position(id) else {
            return Ok(());
        };
        self.write(&JournalRecord::Remove(*id))?;
        self.live.remove(index);
        self.after_write();
        Ok(())
    }

    fn compact(&mut self) -> SyncResult<()> {
        let mut buf = Vec::new();
        for m in &self.live {
            buf.extend_from_slice(&JournalRecord::Append(m.clone()).encode()?);
        }
        let before = self.records;
        self.backend.replace(&buf)?;
        self.records = self.live.len();
        info!(before, after = self.records, "journal compacted");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    mutations: Vec<Mutation>,
    fail_writes: usize,
    writes: usize,
}

/// An in-memory [`DurableStore`] with write-failure injection.
///
/// Clones share state, so a test can inspect what the engine persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that loads `mutations`.
    pub fn with_mutations(mutations: Vec<Mutation>) -> Self {
        let store = Self::default();
        store.inner.lock().mutations = mutations;
        store
    }

    /// Makes the next `count` writes fail.
    pub fn fail_next_writes(&self, count: usize) {
        self.inner.lock().fail_writes = count;
    }

    /// Returns the persisted mutations.
    pub fn snapshot(&self) -> Vec<Mutation> {
        self.inner.lock().mutations.clone()
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        self.inner.lock().writes
    }

    fn mutate(&self, apply: impl FnOnce(&mut Vec<Mutation>)) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        if inner.fail_writes > 0 {
            inner.fail_writes -= 1;
            return Err(SyncError::Persistence(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected write failure",
            ))));
        }
        apply(&mut inner.mutations);
        inner.writes += 1;
        Ok(())
    }
}

impl DurableStore for MemoryStore {
    fn load(&mut self) -> SyncResult<Vec<Mutation>> {
        Ok(self.snapshot())
    }

    fn append(&mut self, mutation: &Mutation) -> SyncResult<()> {
        let mutation = mutation.clone();
        self.mutate(|all| all.push(mutation))
    }

    fn update(&mut self, mutation: &Mutation) -> SyncResult<()> {
        let mutation = mutation.clone();
        self.mutate(|all| {
            if let Some(slot) = all.iter_mut().find(|m| m.id == mutation.id) {
                *slot = mutation;
            }
        })
    }

    fn remove(&mut self, id: &MutationId) -> SyncResult<()> {
        let id = *id;
        self.mutate(|all| all.retain(|m| m.id != id))
    }
}
