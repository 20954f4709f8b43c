//! A single file in the content store.
//!
//! Each entry is backed by three files in the store root:
//!
//! - `<hash>`: the content itself
//! - `<hash>.data`: a JSON object with the entry's metadata
//! - `<hash>.lock`: advisory lock serializing processes that touch the entry
//!
//! Every mutation holds the in-process mutex and then the file lock.
//! In-memory and on-disk metadata are reconciled with [`mf_core::merge`]:
//! while local writes are pending the in-memory side wins, otherwise the
//! on-disk side (written by another process) does.

use std::cell::RefCell;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use mf_core::{merge, ContentHash, Error, MetaValue, Metadata, Result};
use parking_lot::ReentrantMutex;

use crate::lock::ProcessLock;
use crate::storage::remove_file_if_present;

/// Where the content of a newly created entry comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySource {
    /// Rename into place, copying across filesystems.
    MoveFrom(PathBuf),
    CopyFrom(PathBuf),
    /// Keep whatever is at the entry path, creating an empty file if nothing is.
    Empty,
}

#[derive(Debug, Default)]
struct EntryState {
    data: Metadata,
    /// Local writes not yet reconciled with the sidecar.
    dirty: bool,
}

/// One content-addressed file plus its metadata sidecar.
#[derive(Debug)]
pub struct ContentEntry {
    hash: ContentHash,
    path: PathBuf,
    data_path: PathBuf,
    process_lock: ProcessLock,
    state: ReentrantMutex<RefCell<EntryState>>,
}

impl ContentEntry {
    /// Place the content for `hash` under `root` and load its metadata.
    ///
    /// Callers hold the store lock.
    pub(crate) fn create(
        root: &Path,
        hash: ContentHash,
        metadata: Option<Metadata>,
        source: EntrySource,
    ) -> Result<Self> {
        let (data, dirty) = match metadata {
            Some(data) => (data, true),
            None => (Metadata::new(), false),
        };
        let entry = Self {
            path: root.join(hash.as_str()),
            data_path: root.join(format!("{hash}.data")),
            process_lock: ProcessLock::new(root.join(format!("{hash}.lock"))),
            state: ReentrantMutex::new(RefCell::new(EntryState { data, dirty })),
            hash,
        };

        entry.with_locks(|state| {
            place(&entry.path, source)?;
            entry.sync_locked(state)
        })?;
        Ok(entry)
    }

    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    /// File name of the content inside the store root.
    pub fn name(&self) -> &str {
        self.hash.as_str()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Reconcile in-memory metadata with the sidecar.
    pub fn sync(&self) -> Result<()> {
        self.with_locks(|state| self.sync_locked(state))
    }

    /// Shallow-update metadata with every key in `data`.
    pub fn update(&self, data: Metadata) -> Result<()> {
        self.with_locks(|state| {
            state.data.extend(data);
            state.dirty = true;
            self.sync_locked(state)
        })
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<MetaValue>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        self.with_locks(|state| {
            state.data.insert(key, value);
            state.dirty = true;
            self.sync_locked(state)
        })
    }

    pub fn get(&self, key: &str) -> Result<Option<MetaValue>> {
        self.with_locks(|state| {
            self.sync_locked(state)?;
            Ok(state.data.get(key).cloned())
        })
    }

    /// Delete a key here and on disk. Returns the removed value.
    pub fn remove_key(&self, key: &str) -> Result<Option<MetaValue>> {
        self.with_locks(|state| {
            self.sync_locked(state)?;
            let removed = state.data.remove(key);
            if removed.is_some() {
                self.write_sidecar(&state.data)?;
            }
            Ok(removed)
        })
    }

    /// Synced copy of all metadata.
    pub fn metadata(&self) -> Result<Metadata> {
        self.with_locks(|state| {
            self.sync_locked(state)?;
            Ok(state.data.clone())
        })
    }

    /// In-memory metadata as of the last sync, without touching the disk.
    pub fn cached_metadata(&self) -> Metadata {
        let guard = self.state.lock();
        let data = guard.borrow().data.clone();
        data
    }

    /// Delete the content file. The sidecar and lock file are left for the
    /// store to purge.
    pub fn remove(&self) -> Result<()> {
        self.with_locks(|_| match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        })
    }

    fn with_locks<R>(&self, f: impl FnOnce(&mut EntryState) -> Result<R>) -> Result<R> {
        let guard = self.state.lock();
        let _process = self.process_lock.acquire()?;
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    fn sync_locked(&self, state: &mut EntryState) -> Result<()> {
        let disk = self.read_sidecar()?;
        let merged = if state.dirty {
            merge(&disk, &state.data)
        } else {
            merge(&state.data, &disk)
        };
        if merged != disk {
            self.write_sidecar(&merged)?;
        }
        state.data = merged;
        state.dirty = false;
        Ok(())
    }

    fn read_sidecar(&self) -> Result<Metadata> {
        match fs::read(&self.data_path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(data) => Ok(data),
                Err(e) => {
                    // Keep the unreadable bytes next to the entry; the next
                    // write replaces the sidecar itself.
                    let kept = self.data_path.with_extension("data.corrupt");
                    tracing::warn!(
                        hash = %self.hash,
                        kept = %kept.display(),
                        "Replacing unreadable metadata sidecar: {e}"
                    );
                    fs::rename(&self.data_path, &kept)?;
                    Ok(Metadata::new())
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Metadata::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_sidecar(&self, data: &Metadata) -> Result<()> {
        let json = serde_json::to_vec(data)
            .map_err(|e| Error::Store(format!("cannot encode metadata for {}: {e}", self.hash)))?;
        fs::write(&self.data_path, json)?;
        Ok(())
    }
}

fn place(dest: &Path, source: EntrySource) -> Result<()> {
    match source {
        EntrySource::MoveFrom(src) => {
            // Try rename first (same filesystem), fall back to copy+remove.
            if let Err(rename_err) = fs::rename(&src, dest) {
                tracing::debug!("rename into store failed ({rename_err}); copying instead");
                fs::copy(&src, dest)?;
                // The content is in place; a leftover source in a work
                // directory goes when that directory is reaped.
                if let Err(e) = remove_file_if_present(&src) {
                    tracing::warn!(source = %src.display(), "Failed to remove moved source: {e}");
                }
            }
        }
        EntrySource::CopyFrom(src) => {
            fs::copy(&src, dest)?;
        }
        EntrySource::Empty => {
            OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(dest)?;
        }
    }
    Ok(())
}
