//! File-based storage backend for on-device persistence.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A file-based storage backend.
///
/// Data survives process restarts. Opening takes an exclusive advisory lock
/// on `<path>.lock`, held until the backend is dropped, so a journal has a
/// single writer.
///
/// # Durability
///
/// - `flush()` pushes buffered bytes to the OS
/// - `sync()` waits until the OS reports them on disk
/// - `replace()` writes a sibling temp file, syncs it and renames it over
///   the journal, so a crash leaves either the old or the new content
///
/// # Example
///
/// ```no_run
/// use intake_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("queue.journal")).unwrap();
/// backend.append(b"record").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    journal: Mutex<Journal>,
    _owner: File,
}

/// Open journal file and its logical length.
#[derive(Debug)]
struct Journal {
    file: File,
    len: u64,
}

impl Journal {
    fn open(path: &Path, create: bool) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

impl FileBackend {
    /// Opens or creates the journal at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another owner holds the journal,
    /// or an I/O error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let owner = acquire_owner_lock(path)?;
        let journal = Journal::open(path, true)?;
        debug!(path = %path.display(), size = journal.len, "opened journal file");

        Ok(Self {
            path: path.to_path_buf(),
            journal: Mutex::new(journal),
            _owner: owner,
        })
    }

    /// Like [`FileBackend::open`], creating missing parent directories first.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the journal
    /// cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the journal path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn acquire_owner_lock(path: &Path) -> StorageResult<File> {
    let lock_path = sibling(path, ".lock");
    let lock = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;
    if lock.try_lock_exclusive().is_err() {
        return Err(StorageError::Locked { path: lock_path });
    }
    Ok(lock)
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> StorageResult<()> {
    Ok(())
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut journal = self.journal.lock();
        let size = journal.len;
        if offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        let mut buffer = vec![0u8; len];
        if len > 0 {
            journal.file.seek(SeekFrom::Start(offset))?;
            journal.file.read_exact(&mut buffer)?;
        }
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let journal = self.journal.get_mut();
        let offset = journal.len;
        if !data.is_empty() {
            journal.file.seek(SeekFrom::End(0))?;
            journal.file.write_all(data)?;
            journal.len += data.len() as u64;
        }
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(self.journal.get_mut().file.flush()?)
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.journal.lock().len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(self.journal.get_mut().file.sync_all()?)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let journal = self.journal.get_mut();
        if new_size > journal.len {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size: journal.len,
            });
        }

        journal.file.set_len(new_size)?;
        journal.file.sync_all()?;
        journal.len = new_size;
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        let staged_path = sibling(&self.path, ".tmp");
        let mut staged = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&staged_path)?;
        staged.write_all(data)?;
        staged.sync_all()?;
        drop(staged);

        fs::rename(&staged_path, &self.path)?;
        sync_parent_dir(&self.path)?;

        *self.journal.get_mut() = Journal::open(&self.path, false)?;
        debug!(path = %self.path.display(), size = data.len(), "replaced journal file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn journal_in(dir: &TempDir) -> PathBuf {
        dir.path().join("queue.journal")
    }

    #[test]
    fn open_creates_an_empty_journal() {
        let dir = tempdir().unwrap();
        let path = journal_in(&dir);

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn appends_report_their_offsets() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&journal_in(&dir)).unwrap();

        assert_eq!(backend.append(b"rec-1;").unwrap(), 0);
        assert_eq!(backend.append(b"").unwrap(), 6);
        assert_eq!(backend.append(b"rec-2;").unwrap(), 6);
        assert_eq!(backend.read_at(6, 6).unwrap(), b"rec-2;");
        assert!(matches!(
            backend.read_at(8, 6),
            Err(StorageError::ReadPastEnd { size: 12, .. })
        ));
    }

    #[test]
    fn synced_records_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = journal_in(&dir);

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"queued create").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.read_all().unwrap(), b"queued create");
    }

    #[test]
    fn second_owner_is_locked_out_until_drop() {
        let dir = tempdir().unwrap();
        let path = journal_in(&dir);

        let first = FileBackend::open(&path).unwrap();
        assert!(matches!(
            FileBackend::open(&path),
            Err(StorageError::Locked { .. })
        ));

        drop(first);
        assert!(FileBackend::open(&path).is_ok());
    }

    #[test]
    fn replace_swaps_content_and_keeps_appending() {
        let dir = tempdir().unwrap();
        let path = journal_in(&dir);

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"old old old").unwrap();
        backend.replace(b"new").unwrap();
        assert_eq!(backend.size().unwrap(), 3);

        backend.append(b"er").unwrap();
        backend.sync().unwrap();
        assert!(!sibling(&path, ".tmp").exists());

        drop(backend);
        let reopened = FileBackend::open(&path).unwrap();
        assert_eq!(reopened.read_all().unwrap(), b"newer");
    }

    #[test]
    fn truncate_cuts_a_torn_tail() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&journal_in(&dir)).unwrap();

        backend.append(b"whole|torn").unwrap();
        backend.truncate(5).unwrap();
        assert_eq!(backend.read_all().unwrap(), b"whole");
        assert!(matches!(
            backend.truncate(50),
            Err(StorageError::InvalidTruncate { .. })
        ));
    }

    #[test]
    fn nested_directories_are_created() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("profiles").join("default").join("queue.journal");

        let backend = FileBackend::open_with_create_dirs(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert_eq!(backend.path(), path);
    }
}
