//! Volatile storage backend for tests and previews.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// A journal kept in process memory.
///
/// Clones share the same buffer, so a test can keep a handle, drop the
/// engine that owns the other one, and reload from the surviving bytes to
/// simulate a restart.
///
/// # Example
///
/// ```rust
/// use intake_storage::{StorageBackend, InMemoryBackend};
///
/// let mut journal = InMemoryBackend::new();
/// let survivor = journal.clone();
/// journal.append(b"record").unwrap();
/// drop(journal);
/// assert_eq!(survivor.bytes(), b"record");
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a journal preloaded with `bytes`, e.g. a hand-damaged one.
    #[must_use]
    pub fn with_data(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(RwLock::new(bytes)),
        }
    }

    /// Snapshot of the current content.
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }

    /// Overwrites the content in place, bypassing the journal codec.
    ///
    /// Lets tests flip bits or cut records to exercise recovery.
    pub fn corrupt_with(&self, damage: impl FnOnce(&mut Vec<u8>)) {
        damage(&mut *self.bytes.write());
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let bytes = self.bytes.read();
        let size = bytes.len() as u64;
        usize::try_from(offset)
            .ok()
            .and_then(|start| bytes.get(start..start.checked_add(len)?))
            .map(<[u8]>::to_vec)
            .ok_or(StorageError::ReadPastEnd { offset, len, size })
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut bytes = self.bytes.write();
        let offset = bytes.len() as u64;
        bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.bytes.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut bytes = self.bytes.write();
        match usize::try_from(new_size) {
            Ok(keep) if keep <= bytes.len() => {
                bytes.truncate(keep);
                Ok(())
            }
            _ => Err(StorageError::InvalidTruncate {
                requested: new_size,
                size: bytes.len() as u64,
            }),
        }
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        *self.bytes.write() = data.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn reads_are_bounded_by_content() {
        let mut journal = InMemoryBackend::new();
        journal.append(b"abcdef").unwrap();

        assert_eq!(journal.read_at(2, 3).unwrap(), b"cde");
        assert_eq!(journal.read_at(6, 0).unwrap(), b"");
        assert!(matches!(
            journal.read_at(4, 5),
            Err(StorageError::ReadPastEnd { size: 6, .. })
        ));
        assert!(journal.read_at(u64::MAX, 1).is_err());
    }

    #[test]
    fn clones_observe_the_same_journal() {
        let mut journal = InMemoryBackend::new();
        let observer = journal.clone();
        journal.append(b"shared").unwrap();
        assert_eq!(observer.bytes(), b"shared");
        assert_eq!(observer.size().unwrap(), 6);
    }

    #[test]
    fn truncate_and_replace() {
        let mut journal = InMemoryBackend::with_data(b"intact|torn".to_vec());
        journal.truncate(6).unwrap();
        assert_eq!(journal.read_all().unwrap(), b"intact");
        assert!(matches!(
            journal.truncate(7),
            Err(StorageError::InvalidTruncate { requested: 7, size: 6 })
        ));

        journal.replace(b"compacted").unwrap();
        assert_eq!(journal.bytes(), b"compacted");
    }

    #[test]
    fn corrupt_with_edits_in_place() {
        let journal = InMemoryBackend::with_data(vec![0, 0, 0]);
        journal.corrupt_with(|b| b[1] = 0xFF);
        assert_eq!(journal.bytes(), vec![0, 0xFF, 0]);
    }

    proptest! {
        #[test]
        fn appends_concatenate(chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..16)) {
            let mut journal = InMemoryBackend::new();
            let mut expected = Vec::new();
            for chunk in &chunks {
                let offset = journal.append(chunk).unwrap();
                prop_assert_eq!(offset, expected.len() as u64);
                expected.extend_from_slice(chunk);
            }
            prop_assert_eq!(journal.read_all().unwrap(), expected);
        }
    }
}
