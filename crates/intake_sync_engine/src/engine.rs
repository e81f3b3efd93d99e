//! The sync engine: single authority over the mutation queue.

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::queue::MutationQueue;
use crate::remote::RemoteClient;
use crate::status::{DisplayStatus, Registry, StatusObserver, Subscription, SyncState, SyncStatus};
use crate::store::DurableStore;
use intake_sync_protocol::{
    validate_candidate_payload, DeliveryOutcome, LineageKey, Mutation, MutationId, MutationKind,
    MutationStatus, NewMutation, Payload, Rejection, CANDIDATE,
};
use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::ops::AddAssign;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Summary of one or more coalesced flush passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Mutations confirmed by the remote store.
    pub delivered: usize,
    /// Attempts that failed transiently and were rescheduled.
    pub transient: usize,
    /// Mutations permanently rejected.
    pub rejected: usize,
    /// Pending mutations held back by backoff or an earlier failure.
    pub skipped: usize,
    /// Another flush was running; this request was folded into it.
    pub coalesced: bool,
    /// Nothing was attempted because the device is offline.
    pub offline: bool,
}

impl FlushReport {
    fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    fn coalesced() -> Self {
        Self {
            coalesced: true,
            ..Self::default()
        }
    }

    /// Number of delivery attempts made.
    pub fn attempted(&self) -> usize {
        self.delivered + self.transient + self.rejected
    }
}

impl AddAssign for FlushReport {
    fn add_assign(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.transient += other.transient;
        self.rejected += other.rejected;
        self.skipped = other.skipped;
        self.offline |= other.offline;
    }
}

pub(crate) struct EngineInner {
    config: SyncConfig,
    queue: Mutex<MutationQueue>,
    store: Mutex<Box<dyn DurableStore>>,
    remote: Arc<dyn RemoteClient>,
    connectivity: ConnectivityMonitor,
    state: watch::Sender<SyncState>,
    observers: Arc<Registry<dyn StatusObserver>>,
    /// Serializes observer notification so no observer sees states out of
    /// order. Reentrant: observers may call back into the engine.
    notify: ReentrantMutex<()>,
    flushing: AtomicBool,
    flush_requested: AtomicBool,
    pub(crate) wake: Notify,
    pub(crate) reschedule: Notify,
}

/// Offline-first write queue.
///
/// Owns the in-memory queue and the observable [`SyncState`]; the durable
/// store, remote client and connectivity monitor are injected. Cloning
/// yields another handle to the same engine.
///
/// # Example
///
/// ```
/// use intake_sync_engine::{ConnectivityMonitor, MemoryStore, MockRemote, SyncConfig, SyncEngine};
/// use intake_sync_protocol::{CandidateFields, NewMutation, CANDIDATE};
///
/// # tokio_test_block_on(async {
/// let engine = SyncEngine::open(
///     SyncConfig::default(),
///     MemoryStore::new(),
///     MockRemote::new(),
///     ConnectivityMonitor::default(),
/// )?;
///
/// let payload = CandidateFields::new("Ada Lovelace", "ada@x.com").into_payload();
/// engine.enqueue(NewMutation::create(CANDIDATE, payload))?;
/// assert_eq!(engine.get_state().pending_count, 1);
///
/// engine.flush().await;
/// assert_eq!(engine.get_state().pending_count, 0);
/// # Ok::<(), intake_sync_engine::SyncError>(())
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone)]
pub struct SyncEngine {
    pub(crate) inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Loads the persisted queue and creates the engine.
    ///
    /// Mutations interrupted mid-delivery are retried. If terminally failed
    /// mutations were persisted the engine starts in [`SyncStatus::Error`].
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be read or the journal is corrupted.
    pub fn open<S, R>(
        config: SyncConfig,
        mut store: S,
        remote: R,
        connectivity: ConnectivityMonitor,
    ) -> SyncResult<Self>
    where
        S: DurableStore + 'static,
        R: RemoteClient + 'static,
    {
        let loaded = store.load()?;
        let mut queue = MutationQueue::from_loaded(loaded);
        let mut store: Box<dyn DurableStore> = Box::new(store);

        for id in queue.done_ids() {
            store.remove(&id)?;
            queue.remove(&id);
        }

        let state = SyncState {
            status: if queue.failed().next().is_some() {
                SyncStatus::Error
            } else {
                SyncStatus::Idle
            },
            pending_count: queue.outstanding_count(),
            last_error: queue.latest_rejection(),
        };

        info!(
            device_id = %config.device_id,
            pending = state.pending_count,
            status = %state.status,
            "sync engine opened"
        );

        let (state, _) = watch::channel(state);
        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                queue: Mutex::new(queue),
                store: Mutex::new(store),
                remote: Arc::new(remote),
                connectivity,
                state,
                observers: Registry::new(),
                notify: ReentrantMutex::new(()),
                flushing: AtomicBool::new(false),
                flush_requested: AtomicBool::new(false),
                wake: Notify::new(),
                reschedule: Notify::new(),
            }),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Returns the connectivity monitor.
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.connectivity
    }

    /// Queues a mutation and makes it durable before returning its id.
    ///
    /// Submitting a mutation whose id or idempotency key matches an
    /// outstanding entry returns that entry's id and queues nothing.
    /// Being offline is not an error.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidMutation`] if the shape is wrong, or
    /// [`SyncError::Persistence`] if the write could not be made durable;
    /// in both cases nothing was queued.
    pub fn enqueue(&self, mutation: NewMutation) -> SyncResult<MutationId> {
        validate_shape(&mutation)?;

        let (queued, lineage) = {
            let mut queue = self.inner.queue.lock();
            if let Some(existing) = queue.find_duplicate(&mutation) {
                debug!(mutation_id = %existing, "duplicate enqueue ignored");
                return Ok(existing);
            }

            let id = mutation.id.unwrap_or_default();
            let seq = queue.next_seq();
            let queued = mutation.into_mutation(id, seq);

            self.inner.store.lock().append(&queued)?;
            queue.push(queued.clone());
            let lineage = queue.lineage_of(&queued.id).unwrap_or_else(|| queued.lineage());
            (queued, lineage)
        };

        info!(
            mutation_id = %queued.id,
            %lineage,
            kind = %queued.kind,
            "mutation queued"
        );
        self.refresh_state();

        if self.inner.config.flush_on_enqueue {
            self.inner.wake.notify_one();
        }
        Ok(queued.id)
    }

    /// Attempts delivery of every eligible mutation.
    ///
    /// Does nothing while offline. If a flush is already running the
    /// request is coalesced: the running flush makes one more pass after
    /// its current one, and this call returns at once.
    pub async fn flush(&self) -> FlushReport {
        if !self.inner.connectivity.is_online() {
            debug!("flush skipped while offline");
            return FlushReport::offline();
        }
        if self.inner.flushing.swap(true, Ordering::SeqCst) {
            self.inner.flush_requested.store(true, Ordering::SeqCst);
            debug!("flush coalesced into running pass");
            return FlushReport::coalesced();
        }

        let mut report = FlushReport::default();
        loop {
            let mut guard = FlushGuard {
                engine: self,
                finished: false,
            };
            self.inner.flush_requested.store(false, Ordering::SeqCst);
            report += self.flush_pass().await;
            guard.finished = true;
            drop(guard);

            let rerun = self.inner.flush_requested.load(Ordering::SeqCst)
                && self.inner.connectivity.is_online();
            if !rerun || self.inner.flushing.swap(true, Ordering::SeqCst) {
                break;
            }
        }
        report
    }

    /// Clears every backoff deadline and flushes.
    pub async fn retry_now(&self) -> FlushReport {
        self.inner.queue.lock().clear_backoff();
        self.inner.reschedule.notify_one();
        self.flush().await
    }

    /// Returns the current state.
    pub fn get_state(&self) -> SyncState {
        self.inner.state.borrow().clone()
    }

    /// Returns what the UI should render, with offline taking precedence.
    pub fn display_status(&self) -> DisplayStatus {
        if self.inner.connectivity.is_online() {
            DisplayStatus::Online(self.inner.state.borrow().status)
        } else {
            DisplayStatus::Offline
        }
    }

    /// Registers an observer; it receives the current state immediately.
    ///
    /// The observer is registered before the snapshot is taken, so a
    /// transition racing with the call is never missed.
    pub fn subscribe<O>(&self, observer: O) -> Subscription
    where
        O: StatusObserver + 'static,
    {
        let observer: Arc<dyn StatusObserver> = Arc::new(observer);
        let _order = self.inner.notify.lock();
        let subscription = self.inner.observers.register(Arc::clone(&observer));
        observer.on_state_change(&self.get_state());
        subscription
    }

    /// Returns a receiver of state snapshots.
    pub fn watch(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    /// Returns a snapshot of the queue in creation order.
    pub fn mutations(&self) -> Vec<Mutation> {
        self.inner.queue.lock().iter().cloned().collect()
    }

    /// Returns the terminally failed mutations.
    pub fn failed(&self) -> Vec<Mutation> {
        self.inner.queue.lock().failed().cloned().collect()
    }

    /// Returns the earliest backoff deadline, if anything is waiting.
    pub fn next_retry_at(&self) -> Option<Instant> {
        self.inner.queue.lock().earliest_retry()
    }

    /// Drops a terminally failed mutation at the operator's request.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotDiscardable`] unless the mutation is failed, or a
    /// persistence error.
    pub fn discard(&self, id: MutationId) -> SyncResult<Mutation> {
        let removed = {
            let mut queue = self.inner.queue.lock();
            ensure_failed(&queue, id)?;
            self.inner.store.lock().remove(&id)?;
            queue
                .remove(&id)
                .ok_or(SyncError::UnknownMutation(id))?
        };

        info!(mutation_id = %id, lineage = %removed.lineage(), "failed mutation discarded");
        self.refresh_state();
        self.inner.wake.notify_one();
        Ok(removed)
    }

    /// Puts a terminally failed mutation back in line, optionally with
    /// fields merged into its payload.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotDiscardable`] unless the mutation is failed,
    /// [`SyncError::InvalidMutation`] if the edited payload is invalid, or a
    /// persistence error.
    pub fn requeue(&self, id: MutationId, changes: Option<Payload>) -> SyncResult<()> {
        {
            let mut queue = self.inner.queue.lock();
            ensure_failed(&queue, id)?;
            let mut edited = queue
                .get(&id)
                .cloned()
                .ok_or(SyncError::UnknownMutation(id))?;

            if let Some(changes) = changes {
                edited.payload.extend(changes);
                if edited.kind == MutationKind::Create {
                    if let Some(email) = edited.payload.get("email").and_then(Value::as_str) {
                        edited.target.natural_key = Some(email.trim().to_string());
                    }
                }
            }
            if edited.entity_type == CANDIDATE {
                validate_candidate_payload(edited.kind, &edited.payload)?;
            }

            edited.status = MutationStatus::Pending;
            edited.attempt = 0;
            edited.rejection = None;

            self.inner.store.lock().update(&edited)?;
            queue.replace(edited);
        }

        info!(mutation_id = %id, "failed mutation requeued");
        self.refresh_state();
        self.inner.wake.notify_one();
        Ok(())
    }

    async fn flush_pass(&self) -> FlushReport {
        self.purge_delivered();
        self.set_status(SyncStatus::Syncing);

        let plan = self.inner.queue.lock().plan(Instant::now());
        let mut report = FlushReport {
            skipped: plan.skipped,
            ..FlushReport::default()
        };
        let mut halted: HashSet<LineageKey> = HashSet::new();

        for (lineage, planned) in plan.ready {
            if halted.contains(&lineage) {
                report.skipped += 1;
                continue;
            }
            if !self.inner.connectivity.is_online() {
                debug!("went offline mid-flush");
                report.offline = true;
                break;
            }

            // Re-read: a discard, requeue or adopted remote id may have
            // changed the entry since planning.
            let Some(mutation) = self.begin_attempt(&planned.id) else {
                continue;
            };

            match self.deliver(&mutation).await {
                DeliveryOutcome::Delivered { remote_id } => {
                    self.on_delivered(&mutation, &lineage, remote_id);
                    report.delivered += 1;
                }
                DeliveryOutcome::Transient { reason } => {
                    halted.insert(lineage);
                    self.on_transient(&mutation, &reason);
                    report.transient += 1;
                }
                DeliveryOutcome::Rejected(rejection) => {
                    halted.insert(lineage);
                    self.on_rejected(&mutation, rejection);
                    report.rejected += 1;
                }
            }
        }

        self.purge_delivered();
        self.finish_pass();
        debug!(?report, "flush pass finished");
        report
    }

    fn begin_attempt(&self, id: &MutationId) -> Option<Mutation> {
        let mut queue = self.inner.queue.lock();
        let entry = queue.get_mut(id)?;
        if entry.status != MutationStatus::Pending {
            return None;
        }
        entry.status = MutationStatus::InFlight;
        Some(entry.clone())
    }

    async fn deliver(&self, mutation: &Mutation) -> DeliveryOutcome {
        let timeout = self.inner.config.request_timeout;
        debug!(
            mutation_id = %mutation.id,
            attempt = mutation.attempt + 1,
            "delivering {}",
            mutation.describe()
        );
        match tokio::time::timeout(timeout, self.inner.remote.send(mutation)).await {
            Ok(outcome) => outcome,
            Err(_) => DeliveryOutcome::transient(format!(
                "no response within {}ms",
                timeout.as_millis()
            )),
        }
    }

    fn on_delivered(&self, mutation: &Mutation, lineage: &LineageKey, remote_id: Option<i64>) {
        let mut queue = self.inner.queue.lock();
        if let Some(entry) = queue.get_mut(&mutation.id) {
            entry.status = MutationStatus::Done;
        }

        if let (MutationKind::Create, Some(remote_id)) = (mutation.kind, remote_id) {
            let adopted = queue.adopt_remote_id(lineage, remote_id);
            let mut store = self.inner.store.lock();
            for changed in &adopted {
                if let Err(err) = store.update(changed) {
                    warn!(mutation_id = %changed.id, error = %err, "failed to persist adopted remote id");
                    queue.mark_unsaved(changed.id);
                }
            }
        }

        info!(
            mutation_id = %mutation.id,
            %lineage,
            remote_id,
            "mutation delivered"
        );
    }

    fn on_transient(&self, mutation: &Mutation, reason: &str) {
        let mut queue = self.inner.queue.lock();
        let Some(entry) = queue.get_mut(&mutation.id) else {
            return;
        };
        entry.attempt = entry.attempt.saturating_add(1);
        entry.status = MutationStatus::Pending;
        let updated = entry.clone();

        let delay = self.inner.config.retry.delay_for_attempt(updated.attempt);
        queue.set_retry_after(updated.id, Instant::now() + delay);

        if let Err(err) = self.inner.store.lock().update(&updated) {
            warn!(mutation_id = %updated.id, error = %err, "failed to persist attempt count");
            queue.mark_unsaved(updated.id);
        }

        warn!(
            mutation_id = %updated.id,
            lineage = %updated.lineage(),
            attempt = updated.attempt,
            delay_ms = delay.as_millis() as u64,
            reason,
            "transient delivery failure"
        );
    }

    fn on_rejected(&self, mutation: &Mutation, rejection: Rejection) {
        let mut queue = self.inner.queue.lock();
        let Some(entry) = queue.get_mut(&mutation.id) else {
            return;
        };
        entry.attempt = entry.attempt.saturating_add(1);
        entry.status = MutationStatus::Failed;
        entry.rejection = Some(rejection.clone());
        let updated = entry.clone();

        if let Err(err) = self.inner.store.lock().update(&updated) {
            warn!(mutation_id = %updated.id, error = %err, "failed to persist rejection");
            queue.mark_unsaved(updated.id);
        }

        warn!(
            mutation_id = %updated.id,
            lineage = %updated.lineage(),
            %rejection,
            "mutation rejected"
        );
    }

    /// Writes back state the store missed, then removes confirmed entries.
    /// Anything that fails again is retried next pass.
    fn purge_delivered(&self) {
        let mut queue = self.inner.queue.lock();
        let mut store = self.inner.store.lock();

        for missed in queue.take_unsaved() {
            if missed.status == MutationStatus::Done {
                continue;
            }
            match store.update(&missed) {
                Ok(()) => debug!(mutation_id = %missed.id, "persisted deferred mutation state"),
                Err(err) => {
                    warn!(mutation_id = %missed.id, error = %err, "mutation state still not persisted");
                    queue.mark_unsaved(missed.id);
                }
            }
        }

        for id in queue.done_ids() {
            match store.remove(&id) {
                Ok(()) => {
                    queue.remove(&id);
                }
                Err(err) => warn!(mutation_id = %id, error = %err, "failed to remove delivered mutation"),
            }
        }
    }

    /// Puts a delivery abandoned by a dropped flush back in line as a
    /// transient failure.
    fn abandon_in_flight(&self) {
        {
            let mut queue = self.inner.queue.lock();
            let reset = queue.reset_in_flight();
            let now = Instant::now();
            let mut store = self.inner.store.lock();
            for m in &reset {
                let delay = self.inner.config.retry.delay_for_attempt(m.attempt);
                queue.set_retry_after(m.id, now + delay);
                if let Err(err) = store.update(m) {
                    warn!(mutation_id = %m.id, error = %err, "failed to persist attempt count");
                    queue.mark_unsaved(m.id);
                }
                warn!(
                    mutation_id = %m.id,
                    attempt = m.attempt,
                    delay_ms = delay.as_millis() as u64,
                    "flush dropped mid-delivery"
                );
            }
        }
        self.finish_pass();
    }

    fn finish_pass(&self) {
        let (state, deadline) = {
            let queue = self.inner.queue.lock();
            let status = if queue.outstanding_count() == 0 {
                SyncStatus::Synced
            } else if queue.failed().next().is_some() {
                SyncStatus::Error
            } else {
                SyncStatus::Idle
            };
            let state = SyncState {
                status,
                pending_count: queue.outstanding_count(),
                last_error: queue.latest_rejection(),
            };
            (state, queue.earliest_retry())
        };

        if let Some(deadline) = deadline {
            debug!(
                in_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
                "retry scheduled"
            );
        }
        self.publish(state);
        self.inner.reschedule.notify_one();
    }

    fn set_status(&self, status: SyncStatus) {
        let mut state = self.get_state();
        state.status = status;
        self.publish(state);
    }

    /// Recomputes counts after a change outside a flush.
    fn refresh_state(&self) {
        let mut state = self.get_state();
        {
            let queue = self.inner.queue.lock();
            state.pending_count = queue.outstanding_count();
            state.last_error = queue.latest_rejection();
            if state.status != SyncStatus::Syncing {
                state.status = if queue.failed().next().is_some() {
                    SyncStatus::Error
                } else if state.pending_count > 0 {
                    SyncStatus::Idle
                } else if state.status == SyncStatus::Error {
                    SyncStatus::Synced
                } else {
                    state.status
                };
            }
        }
        self.publish(state);
    }

    fn publish(&self, state: SyncState) {
        let _order = self.inner.notify.lock();
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state.clone();
                true
            }
        });
        if changed {
            for observer in self.inner.observers.snapshot() {
                observer.on_state_change(&state);
            }
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("device_id", &self.inner.config.device_id)
            .field("state", &self.get_state())
            .finish()
    }
}

/// Clears the flush flag when a flush ends, including by being dropped.
struct FlushGuard<'a> {
    engine: &'a SyncEngine,
    finished: bool,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.engine.abandon_in_flight();
        }
        self.engine.inner.flushing.store(false, Ordering::SeqCst);
    }
}

fn ensure_failed(queue: &MutationQueue, id: MutationId) -> SyncResult<()> {
    let entry = queue.get(&id).ok_or(SyncError::UnknownMutation(id))?;
    if entry.status != MutationStatus::Failed {
        return Err(SyncError::NotDiscardable {
            id,
            status: entry.status,
        });
    }
    Ok(())
}

fn validate_shape(mutation: &NewMutation) -> SyncResult<()> {
    if mutation.entity_type.trim().is_empty() {
        return Err(SyncError::InvalidMutation("entity type is empty".into()));
    }
    if mutation.kind != MutationKind::Create && mutation.target.is_empty() {
        return Err(SyncError::InvalidMutation(format!(
            "{} needs a remote id or natural key",
            mutation.kind
        )));
    }
    if mutation.entity_type == CANDIDATE {
        validate_candidate_payload(mutation.kind, &mutation.payload)?;
    }
    Ok(())
}
