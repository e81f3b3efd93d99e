//! Online/offline signal with debounced transitions.

use crate::status::{Registry, Subscription};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

type TransitionHandler = dyn Fn(bool) + Send + Sync;

/// Single source of truth for connectivity.
///
/// Platform code calls [`report`](Self::report) with raw observations.
/// Reports are debounced on the trailing edge: the first report after a
/// quiet period opens a window, and when it closes the latest report is
/// published if it differs from the last published value. A flap that
/// ends where it started publishes nothing.
///
/// Cloning yields another handle to the same monitor.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

struct Inner {
    debounce: Duration,
    latest: AtomicBool,
    window_open: AtomicBool,
    published: watch::Sender<bool>,
    handlers: Arc<Registry<TransitionHandler>>,
}

impl Inner {
    fn settle(&self) {
        let online = self.latest.load(Ordering::SeqCst);
        let changed = self.published.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            info!(online, "connectivity changed");
            for handler in self.handlers.snapshot() {
                handler(online);
            }
        }
    }
}

impl ConnectivityMonitor {
    /// Creates a monitor with an initial state and debounce window.
    pub fn new(initial: bool, debounce: Duration) -> Self {
        let (published, _) = watch::channel(initial);
        Self {
            inner: Arc::new(Inner {
                debounce,
                latest: AtomicBool::new(initial),
                window_open: AtomicBool::new(false),
                published,
                handlers: Registry::new(),
            }),
        }
    }

    /// Records a raw connectivity observation.
    ///
    /// Outside a tokio runtime, or with a zero window, the report is
    /// published immediately.
    pub fn report(&self, online: bool) {
        self.inner.latest.store(online, Ordering::SeqCst);

        if self.inner.debounce.is_zero() {
            self.inner.settle();
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.inner.settle();
            return;
        };

        if self.inner.window_open.swap(true, Ordering::SeqCst) {
            debug!(online, "connectivity report absorbed by open window");
            return;
        }

        let inner = Arc::clone(&self.inner);
        runtime.spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            inner.window_open.store(false, Ordering::SeqCst);
            inner.settle();
        });
    }

    /// Returns the published connectivity state.
    pub fn is_online(&self) -> bool {
        *self.inner.published.borrow()
    }

    /// Returns a receiver that observes published transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.published.subscribe()
    }

    /// Registers a handler fired once per published edge.
    pub fn on_transition<F>(&self, handler: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner.handlers.register(Arc::new(handler))
    }

    /// Returns the debounce window.
    pub fn debounce(&self) -> Duration {
        self.inner.debounce
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true, Duration::ZERO)
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.is_online())
            .field("debounce", &self.inner.debounce)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder(monitor: &ConnectivityMonitor) -> (Arc<Mutex<Vec<bool>>>, Subscription) {
        let edges = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&edges);
        let sub = monitor.on_transition(move |online| sink.lock().push(online));
        (edges, sub)
    }

    #[test]
    fn undebounced_reports_publish_immediately() {
        let monitor = ConnectivityMonitor::new(false, Duration::ZERO);
        let (edges, _sub) = recorder(&monitor);

        monitor.report(true);
        monitor.report(true);
        monitor.report(false);

        assert!(!monitor.is_online());
        assert_eq!(*edges.lock(), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn flaps_within_window_collapse_to_one_edge() {
        let monitor = ConnectivityMonitor::new(false, Duration::from_millis(500));
        let (edges, _sub) = recorder(&monitor);

        for online in [true, false, true, false, true] {
            monitor.report(online);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!monitor.is_online());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(monitor.is_online());
        assert_eq!(*edges.lock(), vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn flap_back_to_published_value_is_silent() {
        let monitor = ConnectivityMonitor::new(true, Duration::from_millis(200));
        let (edges, _sub) = recorder(&monitor);
        let mut rx = monitor.subscribe();

        monitor.report(false);
        monitor.report(true);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(monitor.is_online());
        assert!(edges.lock().is_empty());
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn receivers_see_published_edges() {
        let monitor = ConnectivityMonitor::new(false, Duration::from_millis(100));
        let mut rx = monitor.subscribe();

        monitor.report(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
    }

    #[test]
    fn dropped_handler_stops_firing() {
        let monitor = ConnectivityMonitor::default();
        let (edges, sub) = recorder(&monitor);
        monitor.report(false);
        drop(sub);
        monitor.report(true);
        assert_eq!(*edges.lock(), vec![false]);
    }
}
