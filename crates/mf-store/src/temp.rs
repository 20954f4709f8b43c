//! Scoped temporary files.
//!
//! A [`ScopedTempFile`] exclusively owns a freshly created file and removes it
//! when dropped, unless ownership was handed off with
//! [`ScopedTempFile::release`]. Conversion pipelines use these for every
//! intermediate so that early returns, errors and panics all leave the work
//! directory clean.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use mf_core::Result;
use tempfile::TempPath;

/// How [`ScopedTempFile::open`] should open the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Truncate and write from the start.
    Write,
}

/// Exclusively owned (descriptor, path) pair that cleans up after itself.
#[derive(Debug, Default)]
pub struct ScopedTempFile {
    file: Option<File>,
    path: Option<TempPath>,
}

impl ScopedTempFile {
    /// Atomically create a unique file `<dir>/<prefix>XXXXXX<suffix>`.
    pub fn create(dir: &Path, prefix: &str, suffix: &str) -> Result<Self> {
        let named = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(dir)?;
        let (file, path) = named.into_parts();
        tracing::trace!(path = %path.display(), "Created temp file");
        Ok(Self {
            file: Some(file),
            path: Some(path),
        })
    }

    /// A guard that owns nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Path of the owned file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether this guard still owns a path.
    pub fn is_owned(&self) -> bool {
        self.path.is_some()
    }

    /// Open the owned file.
    ///
    /// Hands out the descriptor created with the file when it is still held,
    /// otherwise reopens by path. The returned handle is positioned at the
    /// start; in [`OpenMode::Write`] the file is truncated first.
    pub fn open(&mut self, mode: OpenMode) -> Result<File> {
        let Some(path) = self.path.as_deref() else {
            return Err(mf_core::Error::Internal(
                "temp file guard does not own a file".into(),
            ));
        };

        let mut file = match self.file.take() {
            Some(file) => {
                if mode == OpenMode::Write {
                    file.set_len(0)?;
                }
                file
            }
            None => match mode {
                OpenMode::Read => File::open(path)?,
                OpenMode::Write => OpenOptions::new().write(true).truncate(true).open(path)?,
            },
        };
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }

    /// Close the descriptor but keep owning the path.
    ///
    /// Done before an external program writes to the path.
    pub fn close_descriptor(&mut self) {
        self.file = None;
    }

    /// Exchange contents with `other`.
    pub fn swap(&mut self, other: &mut ScopedTempFile) {
        std::mem::swap(self, other);
    }

    /// Give up ownership. The caller becomes responsible for the path.
    pub fn release(&mut self) -> Option<PathBuf> {
        self.file = None;
        let temp_path = self.path.take()?;
        match temp_path.keep() {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e.error, "Could not release temp file");
                self.path = Some(e.path);
                None
            }
        }
    }

    /// Close the descriptor and delete the file if still owned.
    ///
    /// Calling this more than once, or on an empty guard, does nothing.
    pub fn close(&mut self) -> Result<()> {
        self.file = None;
        if let Some(temp_path) = self.path.take() {
            match temp_path.close() {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl Drop for ScopedTempFile {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to remove temp file: {e}");
        }
    }
}
