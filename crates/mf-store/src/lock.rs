//! Cross-process advisory locks.
//!
//! A [`ProcessLock`] names a lock file; [`ProcessLock::acquire`] blocks until
//! an exclusive advisory lock on it is held. Locks are per open file, so two
//! handles in the same process exclude each other as well. Callers must not
//! acquire the same lock twice on one thread.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// Named advisory lock file.
#[derive(Debug, Clone)]
pub struct ProcessLock {
    path: PathBuf,
}

/// Held lock. Unlocked on drop.
#[derive(Debug)]
pub struct ProcessLockGuard {
    file: File,
}

impl ProcessLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the lock is held.
    pub fn acquire(&self) -> std::io::Result<ProcessLockGuard> {
        let file = self.open()?;
        file.lock_exclusive()?;
        Ok(ProcessLockGuard { file })
    }

    /// Take the lock only if it is free right now.
    pub fn try_acquire(&self) -> std::io::Result<Option<ProcessLockGuard>> {
        let file = self.open()?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(ProcessLockGuard { file })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn open(&self) -> std::io::Result<File> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)
    }
}

impl Drop for ProcessLockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to release lock: {e}");
        }
    }
}
