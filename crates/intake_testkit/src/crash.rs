//! Crash simulation for journal recovery tests.
//!
//! [`CrashableBackend`] wraps a real backend and, once armed, cuts an append
//! short at a byte threshold the way a power loss would. After the crash
//! every write fails, so whatever reached the inner backend stays there for
//! the recovery path to deal with. Reads keep working.

use intake_storage::{StorageBackend, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct CrashState {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
}

/// Handle for arming and inspecting a [`CrashableBackend`] after it has been
/// moved into a store.
#[derive(Debug, Clone)]
pub struct CrashControl {
    state: Arc<CrashState>,
}

impl CrashControl {
    /// Crashes once `bytes` more bytes have been appended.
    pub fn crash_after(&self, bytes: usize) {
        let written = self.state.bytes_written.load(Ordering::SeqCst);
        self.state
            .crash_after_bytes
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Makes `flush` and `sync` fail (and count as a crash).
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.state.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    /// Clears the crash, as if the process restarted on the same disk.
    pub fn reset(&self) {
        self.state.crash_after_bytes.store(usize::MAX, Ordering::SeqCst);
        self.state.crashed.store(false, Ordering::SeqCst);
        self.state.fail_on_sync.store(false, Ordering::SeqCst);
    }
}

/// A storage backend wrapper that can simulate crashes.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    state: Arc<CrashState>,
}

fn crash_error(what: &str) -> StorageError {
    StorageError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("simulated crash during {}", what),
    ))
}

impl CrashableBackend {
    /// Wraps `inner`. Nothing crashes until armed through [`control`](Self::control).
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        Self {
            inner,
            state: Arc::new(CrashState {
                crash_after_bytes: AtomicUsize::new(usize::MAX),
                bytes_written: AtomicUsize::new(0),
                crashed: AtomicBool::new(false),
                fail_on_sync: AtomicBool::new(false),
            }),
        }
    }

    /// Returns a control handle sharing this backend's crash state.
    pub fn control(&self) -> CrashControl {
        CrashControl {
            state: Arc::clone(&self.state),
        }
    }

    fn check_alive(&self, what: &str) -> StorageResult<()> {
        if self.state.crashed.load(Ordering::SeqCst) {
            return Err(crash_error(what));
        }
        Ok(())
    }

    fn check_sync(&self, what: &str) -> StorageResult<()> {
        self.check_alive(what)?;
        if self.state.fail_on_sync.load(Ordering::SeqCst) {
            self.state.crashed.store(true, Ordering::SeqCst);
            return Err(crash_error(what));
        }
        Ok(())
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        self.check_alive("write")?;

        let current = self.state.bytes_written.load(Ordering::SeqCst);
        let threshold = self.state.crash_after_bytes.load(Ordering::SeqCst);

        if current.saturating_add(bytes.len()) > threshold {
            self.state.crashed.store(true, Ordering::SeqCst);
            let partial_len = threshold.saturating_sub(current);
            if partial_len > 0 {
                self.inner.append(&bytes[..partial_len])?;
            }
            self.state
                .bytes_written
                .fetch_add(partial_len, Ordering::SeqCst);
            return Err(crash_error("partial write"));
        }

        let offset = self.inner.append(bytes)?;
        self.state
            .bytes_written
            .fetch_add(bytes.len(), Ordering::SeqCst);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.check_sync("flush")?;
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_sync("sync")?;
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_alive("truncate")?;
        self.inner.truncate(new_size)
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        self.check_alive("replace")?;
        self.inner.replace(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_storage::InMemoryBackend;

    #[test]
    fn normal_operation_passes_through() {
        let disk = InMemoryBackend::new();
        let mut backend = CrashableBackend::new(Box::new(disk.clone()));

        let offset = backend.append(b"test data").unwrap();
        backend.sync().unwrap();

        assert_eq!(backend.read_at(offset, 9).unwrap(), b"test data");
        assert_eq!(disk.bytes(), b"test data");
    }

    #[test]
    fn crash_leaves_a_partial_write() {
        let disk = InMemoryBackend::new();
        let mut backend = CrashableBackend::new(Box::new(disk.clone()));
        let control = backend.control();

        backend.append(&[1u8; 5]).unwrap();
        control.crash_after(3);

        assert!(backend.append(&[2u8; 10]).is_err());
        assert!(control.has_crashed());
        assert_eq!(disk.bytes().len(), 8);
    }

    #[test]
    fn crashed_backend_refuses_repairs() {
        let disk = InMemoryBackend::new();
        let mut backend = CrashableBackend::new(Box::new(disk.clone()));
        let control = backend.control();
        control.crash_after(2);

        assert!(backend.append(b"abcdef").is_err());
        assert!(backend.truncate(0).is_err());
        assert!(backend.replace(b"").is_err());
        assert_eq!(disk.bytes(), b"ab");

        control.reset();
        backend.truncate(0).unwrap();
        assert!(disk.bytes().is_empty());
    }

    #[test]
    fn failing_sync_is_a_crash() {
        let mut backend = CrashableBackend::new(Box::new(InMemoryBackend::new()));
        let control = backend.control();
        control.set_fail_on_sync(true);

        backend.append(b"x").unwrap();
        assert!(backend.sync().is_err());
        assert!(control.has_crashed());
        assert!(backend.append(b"y").is_err());
    }
}
