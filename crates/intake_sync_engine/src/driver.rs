//! Background task that decides when to flush.
//!
//! The driver reacts to three triggers: a debounced online edge (clear
//! backoff and flush), a wake-up from enqueue/discard/requeue, and the
//! earliest backoff deadline. The deadline is re-read after every flush,
//! so a timer whose work already ran through another trigger is dropped.

use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Handle to a running driver.
#[derive(Debug)]
pub struct DriverHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl DriverHandle {
    /// Stops the driver, waiting for an in-progress flush to finish.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRunning`] if the task had already died.
    pub async fn shutdown(self) -> SyncResult<()> {
        self.shutdown.notify_one();
        self.task.await.map_err(|_| SyncError::NotRunning)
    }

    /// Returns true once the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl SyncEngine {
    /// Spawns the background driver on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRunning`] when called outside a runtime.
    pub fn spawn_driver(&self) -> SyncResult<DriverHandle> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SyncError::NotRunning)?;
        let shutdown = Arc::new(Notify::new());
        let task = runtime.spawn(run(self.clone(), Arc::clone(&shutdown)));
        Ok(DriverHandle { shutdown, task })
    }
}

async fn run(engine: SyncEngine, shutdown: Arc<Notify>) {
    let mut online = engine.connectivity().subscribe();
    info!(device_id = %engine.config().device_id, "sync driver started");

    if *online.borrow_and_update() {
        flush(&engine).await;
    }

    loop {
        // Offline, the online edge is what resumes delivery.
        let deadline = if engine.connectivity().is_online() {
            engine.next_retry_at()
        } else {
            None
        };
        tokio::select! {
            _ = shutdown.notified() => break,
            changed = online.changed() => {
                if changed.is_err() {
                    break;
                }
                if *online.borrow_and_update() {
                    debug!("back online, retrying immediately");
                    engine.retry_now().await;
                }
            }
            _ = engine.inner.wake.notified() => {
                flush(&engine).await;
            }
            _ = engine.inner.reschedule.notified() => {}
            _ = sleep_until(deadline) => {
                debug!("backoff expired");
                flush(&engine).await;
            }
        }
    }

    info!("sync driver stopped");
}

async fn flush(engine: &SyncEngine) {
    if engine.flush().await.coalesced {
        // The running flush signals when its last pass ends.
        engine.inner.reschedule.notified().await;
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
