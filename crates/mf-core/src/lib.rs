//! mf-core: shared types, identifiers, errors, configuration and the
//! format catalog.
//!
//! This crate is the foundational dependency for the other mf-* crates. It
//! has no knowledge of the filesystem layout or of running processes; it only
//! defines the vocabulary they share.

pub mod config;
pub mod error;
pub mod format;
pub mod ids;
pub mod merge;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, FaultKind, Result, TaskFailure};
pub use format::{FileFormat, FormatCatalog};
pub use ids::{ContentHash, Fingerprint};
pub use merge::{merge, MetaValue, Metadata};
