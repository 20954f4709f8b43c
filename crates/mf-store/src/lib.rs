//! mf-store: everything meshforge keeps on disk.
//!
//! - [`ScopedTempFile`]: temp files that remove themselves
//! - [`ContentStore`] / [`ContentEntry`]: the content-addressed result cache,
//!   safe to share between threads and between processes
//! - [`Storage`]: the storage root with its work directory and deferred
//!   removals

pub mod entry;
pub mod hash;
pub mod lock;
pub mod storage;
pub mod store;
pub mod temp;

pub use entry::{ContentEntry, EntrySource};
pub use hash::{hash_bytes, hash_file};
pub use lock::{ProcessLock, ProcessLockGuard};
pub use storage::{Removal, Storage};
pub use store::{ContentStore, SyncReport};
pub use temp::{OpenMode, ScopedTempFile};
