//! Content-addressed file store shared by threads and processes.
//!
//! The store is a directory of [`ContentEntry`] files plus an in-memory index
//! of the ones this process knows about. The index only ever holds hashes
//! whose file exists on disk (up to the next [`ContentStore::sync`], which
//! evicts anything another process deleted).
//!
//! Two lock layers protect it: a reentrant in-process mutex and an advisory
//! lock on `<root>/.lock`. Both are held for every mutation, always taken
//! before any entry lock.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use mf_core::{ContentHash, Metadata, Result};
use parking_lot::ReentrantMutex;

use crate::entry::{ContentEntry, EntrySource};
use crate::lock::ProcessLock;
use crate::storage::remove_file_if_present;

type Index = HashMap<ContentHash, Arc<ContentEntry>>;

/// What a [`ContentStore::sync`] pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Files found on disk that were not indexed yet.
    pub discovered: usize,
    /// Indexed entries whose file is gone.
    pub evicted: usize,
    /// `.lock` / `.data` files without a content file, deleted.
    pub orphans_removed: usize,
}

/// Directory of content-addressed files.
#[derive(Debug)]
pub struct ContentStore {
    root: PathBuf,
    process_lock: ProcessLock,
    index: ReentrantMutex<RefCell<Index>>,
}

impl ContentStore {
    /// Open (creating if needed) the store at `root` and index its contents.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let store = Self {
            process_lock: ProcessLock::new(root.join(".lock")),
            index: ReentrantMutex::new(RefCell::new(HashMap::new())),
            root,
        };
        let report = store.sync()?;
        tracing::info!(
            root = %store.root.display(),
            entries = store.len(),
            orphans_removed = report.orphans_removed,
            "Opened content store"
        );
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// In-memory lookup. Does not look at the disk.
    pub fn get(&self, hash: &ContentHash) -> Option<Arc<ContentEntry>> {
        let guard = self.index.lock();
        let entry = guard.borrow().get(hash).cloned();
        entry
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.index.lock().borrow().contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.index.lock().borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indexed hashes, sorted.
    pub fn hashes(&self) -> Vec<ContentHash> {
        let guard = self.index.lock();
        let mut hashes: Vec<_> = guard.borrow().keys().cloned().collect();
        hashes.sort();
        hashes
    }

    /// Return the entry for `hash`, creating it from `source` if needed.
    ///
    /// The flag is `true` only when this call placed `source` into the store.
    /// When the entry already exists (indexed here, or created on disk by
    /// another process) `source` and `metadata` are left untouched and the
    /// source stays the caller's to discard.
    pub fn get_or_create(
        &self,
        hash: &ContentHash,
        metadata: Option<Metadata>,
        source: EntrySource,
    ) -> Result<(Arc<ContentEntry>, bool)> {
        let guard = self.index.lock();

        let indexed = guard.borrow().get(hash).cloned();
        if let Some(entry) = indexed {
            if entry.exists() {
                return Ok((entry, false));
            }
            tracing::debug!(hash = %hash, "Indexed entry vanished from disk; recreating");
            guard.borrow_mut().remove(hash);
        }

        let _process = self.process_lock.acquire()?;
        let on_disk = self.root.join(hash.as_str()).exists();
        let (entry, created) = if on_disk {
            let entry = ContentEntry::create(&self.root, hash.clone(), None, EntrySource::Empty)?;
            (entry, false)
        } else {
            let entry = ContentEntry::create(&self.root, hash.clone(), metadata, source)?;
            (entry, true)
        };

        let entry = Arc::new(entry);
        guard.borrow_mut().insert(hash.clone(), Arc::clone(&entry));
        if created {
            tracing::debug!(hash = %hash, "Stored new entry");
        } else {
            tracing::debug!(hash = %hash, "Indexed entry created by another process");
        }
        Ok((entry, created))
    }

    /// Reconcile the index with the directory.
    ///
    /// Indexes untracked content files, re-syncs tracked ones, evicts entries
    /// whose file disappeared and deletes orphaned `.lock` / `.data` files.
    /// Names starting with `.` and subdirectories are ignored.
    pub fn sync(&self) -> Result<SyncReport> {
        let guard = self.index.lock();
        let _process = self.process_lock.acquire()?;
        self.sync_locked(&guard)
    }

    fn sync_locked(&self, index: &RefCell<Index>) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut seen = HashSet::new();
        let mut sidecars = Vec::new();

        for dirent in fs::read_dir(&self.root)? {
            let dirent = dirent?;
            let Some(name) = dirent.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if name.starts_with('.') || dirent.file_type()?.is_dir() {
                continue;
            }
            if let Some(stem) = name
                .strip_suffix(".lock")
                .or_else(|| name.strip_suffix(".data"))
            {
                sidecars.push((stem.to_owned(), dirent.path()));
                continue;
            }

            let Ok(hash) = ContentHash::from_str(&name) else {
                tracing::debug!(name = %name, "Skipping file that is not a content hash");
                continue;
            };

            let tracked = index.borrow().get(&hash).cloned();
            match tracked {
                Some(entry) => {
                    if let Err(e) = entry.sync() {
                        tracing::warn!(hash = %hash, "Failed to sync entry: {e}");
                    }
                }
                None => {
                    let entry =
                        ContentEntry::create(&self.root, hash.clone(), None, EntrySource::Empty)?;
                    index.borrow_mut().insert(hash.clone(), Arc::new(entry));
                    report.discovered += 1;
                }
            }
            seen.insert(hash);
        }

        index.borrow_mut().retain(|hash, _| {
            let keep = seen.contains(hash);
            if !keep {
                tracing::debug!(hash = %hash, "Evicting entry whose file is gone");
                report.evicted += 1;
            }
            keep
        });

        for (stem, path) in sidecars {
            let owned = ContentHash::from_str(&stem)
                .map(|hash| seen.contains(&hash))
                .unwrap_or(false);
            if owned {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => report.orphans_removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), "Failed to remove orphan: {e}"),
            }
        }

        Ok(report)
    }

    /// Delete an entry and its sidecar files. Returns whether anything was
    /// there.
    pub fn remove(&self, hash: &ContentHash) -> Result<bool> {
        let guard = self.index.lock();
        let _process = self.process_lock.acquire()?;

        let indexed = guard.borrow_mut().remove(hash);
        let path = self.root.join(hash.as_str());
        let mut existed = indexed.is_some();
        match indexed {
            Some(entry) => entry.remove()?,
            None => match fs::remove_file(&path) {
                Ok(()) => existed = true,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }

        for suffix in ["data", "lock"] {
            let sidecar = self.root.join(format!("{hash}.{suffix}"));
            if let Err(e) = remove_file_if_present(&sidecar) {
                tracing::warn!(hash = %hash, path = %sidecar.display(), "Failed to remove sidecar: {e}");
            }
        }

        tracing::debug!(hash = %hash, existed, "Removed entry");
        Ok(existed)
    }

    /// Flush every entry's metadata and drop the index.
    pub fn close(&self) -> Result<()> {
        let guard = self.index.lock();
        let _process = self.process_lock.acquire()?;
        let entries: Vec<_> = guard.borrow_mut().drain().map(|(_, e)| e).collect();
        for entry in entries {
            if entry.exists() {
                entry.sync()?;
            }
        }
        Ok(())
    }
}
