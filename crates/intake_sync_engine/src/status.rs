//! Observable sync status and the observer contract.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Coarse engine status rendered by the UI badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Nothing delivered yet this session, or retriable work is waiting.
    #[default]
    Idle,
    /// A flush is in progress.
    Syncing,
    /// The queue drained completely.
    Synced,
    /// At least one mutation was permanently rejected.
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        })
    }
}

/// Snapshot of the engine's observable state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SyncState {
    /// Current status.
    pub status: SyncStatus,
    /// Number of mutations not yet confirmed, failed ones included.
    pub pending_count: usize,
    /// Description of the most recent permanent failure.
    pub last_error: Option<String>,
}

/// What the UI should render, with offline taking precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayStatus {
    /// The connectivity monitor reports offline.
    Offline,
    /// Online; the engine status applies.
    Online(SyncStatus),
}

impl fmt::Display for DisplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayStatus::Offline => f.write_str("offline"),
            DisplayStatus::Online(status) => status.fmt(f),
        }
    }
}

/// Receives a state snapshot on subscribe and on every transition.
pub trait StatusObserver: Send + Sync {
    /// Called with the new state.
    fn on_state_change(&self, state: &SyncState);
}

impl<F> StatusObserver for F
where
    F: Fn(&SyncState) + Send + Sync,
{
    fn on_state_change(&self, state: &SyncState) {
        self(state)
    }
}

/// Handle returned by `subscribe`; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Stops delivery to the handler.
    pub fn unsubscribe(self) {}

    /// Keeps the handler registered for the lifetime of its source.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Handler list shared by status observers and connectivity handlers.
pub(crate) struct Registry<H: ?Sized> {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(u64, Arc<H>)>>,
}

impl<H: ?Sized + Send + Sync + 'static> Registry<H> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(0),
            handlers: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn register(self: &Arc<Self>, handler: Arc<H>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().push((id, handler));

        let registry: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.handlers.lock().retain(|(h, _)| *h != id);
            }
        })
    }

    /// Handlers are invoked outside the lock so they may unsubscribe.
    pub(crate) fn snapshot(&self) -> Vec<Arc<H>> {
        self.handlers
            .lock()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn closures_are_observers() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let observer = move |state: &SyncState| {
            counter.store(state.pending_count, Ordering::SeqCst);
        };
        observer.on_state_change(&SyncState {
            pending_count: 4,
            ..SyncState::default()
        });
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn dropping_subscription_unregisters() {
        let registry: Arc<Registry<dyn StatusObserver>> = Registry::new();
        let first = registry.register(Arc::new(|_: &SyncState| {}));
        let second = registry.register(Arc::new(|_: &SyncState| {}));
        assert_eq!(registry.len(), 2);

        drop(first);
        assert_eq!(registry.len(), 1);
        second.unsubscribe();
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn detached_subscription_stays_registered() {
        let registry: Arc<Registry<dyn StatusObserver>> = Registry::new();
        registry.register(Arc::new(|_: &SyncState| {})).detach();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn display_status_prefers_offline() {
        assert_eq!(DisplayStatus::Offline.to_string(), "offline");
        assert_eq!(DisplayStatus::Online(SyncStatus::Synced).to_string(), "synced");
    }
}
