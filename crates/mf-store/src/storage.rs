//! The storage root as a whole: the content store, this process's work
//! directory under `tmp/` and a queue of removals deferred until the next
//! sync point.
//!
//! Every open [`Storage`] works in its own `tmp/<uuid>/` directory and holds
//! an advisory lock on `tmp/<uuid>.lock` while it lives. Opening reaps only
//! work directories whose lock nobody holds, so processes sharing one root
//! never delete each other's in-flight files.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use mf_core::{ContentHash, Result};
use parking_lot::Mutex;

use crate::lock::{ProcessLock, ProcessLockGuard};
use crate::store::{ContentStore, SyncReport};
use crate::temp::ScopedTempFile;

/// Name of the directory under the storage root holding work directories.
pub const TMP_DIR: &str = "tmp";

/// Something to delete at the next [`Storage::sync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// A store entry and its sidecars.
    Entry(ContentHash),
    /// A bare file, typically a released temp file.
    Path(PathBuf),
}

/// Content store plus work directory plus deferred removals.
#[derive(Debug)]
pub struct Storage {
    store: ContentStore,
    tmp_dir: PathBuf,
    pending: Mutex<Vec<Removal>>,
    _work_lock: ProcessLockGuard,
}

impl Storage {
    /// Open the storage root, claim a fresh work directory and reap the
    /// ones abandoned by processes that are gone.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let store = ContentStore::open(&root)?;
        let tmp_root = root.join(TMP_DIR);
        fs::create_dir_all(&tmp_root)?;

        let name = uuid::Uuid::new_v4().simple().to_string();
        let work_lock = ProcessLock::new(tmp_root.join(format!("{name}.lock"))).acquire()?;
        let tmp_dir = tmp_root.join(&name);
        fs::create_dir_all(&tmp_dir)?;

        let reaped = reap_abandoned(&tmp_root, &name)?;
        if reaped > 0 {
            tracing::debug!(dir = %tmp_root.display(), reaped, "Reaped abandoned work directories");
        }

        Ok(Self {
            store,
            tmp_dir,
            pending: Mutex::new(Vec::new()),
            _work_lock: work_lock,
        })
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    /// New scoped temp file in the work directory.
    pub fn temp_file(&self, prefix: &str, suffix: &str) -> Result<ScopedTempFile> {
        ScopedTempFile::create(&self.tmp_dir, prefix, suffix)
    }

    /// Queue a removal for the next sync point.
    pub fn remove_later(&self, removal: Removal) {
        tracing::trace!(?removal, "Queued removal");
        self.pending.lock().push(removal);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Perform all queued removals. Failures are logged, not returned.
    pub fn flush(&self) -> usize {
        let pending = std::mem::take(&mut *self.pending.lock());
        let mut done = 0;
        for removal in pending {
            let result = match &removal {
                Removal::Entry(hash) => self.store.remove(hash).map(|_| ()),
                Removal::Path(path) => match fs::remove_file(path) {
                    Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
                    _ => Ok(()),
                },
            };
            match result {
                Ok(()) => done += 1,
                Err(e) => tracing::warn!(?removal, "Deferred removal failed: {e}"),
            }
        }
        done
    }

    /// Flush deferred removals, then reconcile the store with the disk.
    pub fn sync(&self) -> Result<SyncReport> {
        let removed = self.flush();
        if removed > 0 {
            tracing::debug!(removed, "Flushed deferred removals");
        }
        self.store.sync()
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        // The work lock is still held here; it is released after this runs.
        if let Err(e) = remove_dir_if_present(&self.tmp_dir) {
            tracing::warn!(dir = %self.tmp_dir.display(), "Failed to remove work directory: {e}");
        }
        let lock = self.tmp_dir.with_extension("lock");
        if let Err(e) = remove_file_if_present(&lock) {
            tracing::warn!(lock = %lock.display(), "Failed to remove work lock: {e}");
        }
    }
}

/// Delete every work directory under `tmp_root` whose lock is free, along
/// with loose files left by older layouts. `own` is never touched.
fn reap_abandoned(tmp_root: &Path, own: &str) -> Result<usize> {
    let own_lock = format!("{own}.lock");
    let mut reaped = 0;
    for dirent in fs::read_dir(tmp_root)? {
        let dirent = dirent?;
        let Some(name) = dirent.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if name == own || name == own_lock {
            continue;
        }
        let path = dirent.path();
        // Entries can vanish under a concurrent reaper.
        let Ok(file_type) = dirent.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            let lock = ProcessLock::new(tmp_root.join(format!("{name}.lock")));
            let Some(_held) = lock.try_acquire()? else {
                continue;
            };
            remove_dir_if_present(&path)?;
            remove_file_if_present(lock.path())?;
            reaped += 1;
        } else if name.ends_with(".lock") {
            // A lock without a directory may belong to an opener that has
            // not locked it yet. Leave it.
            continue;
        } else {
            remove_file_if_present(&path)?;
        }
    }
    Ok(reaped)
}

pub(crate) fn remove_dir_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Delete `path`; a file that is already gone is not an error.
pub(crate) fn remove_file_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntrySource;
    use crate::hash::hash_bytes;

    #[test]
    fn open_reaps_abandoned_work_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join(TMP_DIR);
        fs::create_dir_all(tmp.join("0123abcd")).unwrap();
        fs::write(tmp.join("0123abcd").join("leftover.3ds"), b"x").unwrap();
        fs::write(tmp.join("0123abcd.lock"), b"").unwrap();
        fs::write(tmp.join("deadbeef.lock"), b"").unwrap();
        fs::write(tmp.join("input-loose.ldr"), b"x").unwrap();

        let storage = Storage::open(dir.path()).unwrap();
        assert!(storage.tmp_dir().is_dir());
        assert!(storage.tmp_dir().starts_with(&tmp));
        assert_eq!(fs::read_dir(storage.tmp_dir()).unwrap().count(), 0);

        let mut names: Vec<_> = fs::read_dir(&tmp)
            .unwrap()
            .map(|d| d.unwrap().path())
            .collect();
        names.sort();
        let own = storage.tmp_dir().to_path_buf();
        let own_lock = tmp.join(format!(
            "{}.lock",
            own.file_name().unwrap().to_str().unwrap()
        ));
        let mut expected = vec![own, own_lock, tmp.join("deadbeef.lock")];
        expected.sort();
        assert_eq!(names, expected);
    }

    #[test]
    fn second_open_keeps_live_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let first = Storage::open(dir.path()).unwrap();
        let mut guard = first.temp_file("output", ".3ds").unwrap();
        {
            use std::io::Write;
            let mut file = guard.open(crate::temp::OpenMode::Write).unwrap();
            file.write_all(b"3DS in progress").unwrap();
        }
        let path = guard.path().unwrap().to_path_buf();

        let second = Storage::open(dir.path()).unwrap();
        assert_ne!(first.tmp_dir(), second.tmp_dir());
        assert!(path.exists());
        assert_eq!(fs::read(&path).unwrap(), b"3DS in progress");

        // Once the first opener is gone its directory is fair game.
        let first_dir = first.tmp_dir().to_path_buf();
        drop(guard);
        drop(first);
        assert!(!first_dir.exists());
        let third = Storage::open(dir.path()).unwrap();
        assert!(second.tmp_dir().is_dir());
        assert!(third.tmp_dir().is_dir());
    }

    #[test]
    fn dropping_storage_removes_its_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let work = storage.tmp_dir().to_path_buf();
        let released = storage.temp_file("output", ".obj").unwrap().release().unwrap();
        assert!(released.exists());

        drop(storage);
        assert!(!work.exists());
        assert!(!work.with_extension("lock").exists());
    }

    #[test]
    fn remove_file_if_present_only_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        remove_file_if_present(&dir.path().join("never-existed")).unwrap();

        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();
        remove_file_if_present(&file).unwrap();
        assert!(!file.exists());

        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        assert!(remove_file_if_present(&sub).is_err());
    }

    #[test]
    fn temp_files_live_in_tmp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let guard = storage.temp_file("input", ".ldr").unwrap();
        assert!(guard.path().unwrap().starts_with(storage.tmp_dir()));
        assert!(storage.store().is_empty());
    }

    #[test]
    fn removals_wait_for_sync() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        let hash = hash_bytes(b"cached");
        let (entry, _) = storage
            .store()
            .get_or_create(&hash, None, EntrySource::Empty)
            .unwrap();
        let loose = storage.tmp_dir().join("result.obj");
        fs::write(&loose, b"v 1 1 1").unwrap();

        storage.remove_later(Removal::Entry(hash.clone()));
        storage.remove_later(Removal::Path(loose.clone()));
        storage.remove_later(Removal::Path(dir.path().join("never-existed")));
        assert_eq!(storage.pending_len(), 3);
        assert!(entry.exists());
        assert!(loose.exists());

        storage.sync().unwrap();
        assert_eq!(storage.pending_len(), 0);
        assert!(!entry.exists());
        assert!(!loose.exists());
        assert!(!storage.store().contains(&hash));
    }
}
