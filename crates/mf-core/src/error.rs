//! Unified error type for meshforge.
//!
//! Every failure is classified into a [`FaultKind`]: client faults (bad
//! requests, unreachable sources), conversion faults (a converter ran and
//! exited non-zero) and system faults (a converter could not be launched, or
//! the store hit an I/O error). API handlers derive the HTTP status from
//! [`Error::http_status`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity class of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The request itself was invalid. Never retried.
    Client,
    /// An external converter ran and reported failure.
    Conversion,
    /// The host could not do its part: launch failure, I/O, store errors.
    System,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FaultKind::Client => "client",
            FaultKind::Conversion => "conversion",
            FaultKind::System => "system",
        };
        f.write_str(s)
    }
}

/// Unified error type covering all failure modes in meshforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A format name is not known, or no backend can handle the pair.
    #[error("Unsupported {direction} format {format}")]
    UnsupportedFormat {
        /// `"source"` or `"destination"`.
        direction: &'static str,
        /// The offending format name.
        format: String,
    },

    /// The conversion source could not be fetched.
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "task", "file").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// An external converter exited with a non-zero status.
    #[error("Conversion failed [{tool}]: {message}")]
    Conversion {
        /// Name of the converter program.
        tool: String,
        /// Human-readable error description.
        message: String,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },

    /// An external converter could not be started at all.
    #[error("Could not execute {tool}: {source}")]
    Launch {
        /// Name of the converter program.
        tool: String,
        /// The OS error returned by spawn.
        #[source]
        source: std::io::Error,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The content store is in a state it cannot work with.
    #[error("Store error: {0}")]
    Store(String),

    /// A failure captured on a finished task, re-raised to its caller.
    #[error("{0}")]
    TaskFailed(TaskFailure),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> FaultKind {
        match self {
            Error::Validation(_)
            | Error::UnsupportedFormat { .. }
            | Error::Fetch(_)
            | Error::NotFound { .. } => FaultKind::Client,
            Error::Conversion { .. } => FaultKind::Conversion,
            Error::Launch { .. } | Error::Io { .. } | Error::Store(_) | Error::Internal(_) => {
                FaultKind::System
            }
            Error::TaskFailed(failure) => failure.kind,
        }
    }

    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            other => match other.kind() {
                FaultKind::Client | FaultKind::Conversion => 400,
                FaultKind::System => 500,
            },
        }
    }

    /// Short machine-readable code for API bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::UnsupportedFormat { .. } => "unsupported_format",
            Error::Fetch(_) => "fetch_error",
            Error::NotFound { .. } => "not_found",
            Error::Conversion { .. } => "conversion_error",
            Error::Launch { .. } => "launch_error",
            Error::Io { .. } => "io_error",
            Error::Store(_) => "store_error",
            Error::TaskFailed(_) => "task_failed",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Unsupported input format.
    pub fn unsupported_source(format: impl Into<String>) -> Self {
        Error::UnsupportedFormat {
            direction: "source",
            format: format.into(),
        }
    }

    /// Unsupported output format.
    pub fn unsupported_destination(format: impl Into<String>) -> Self {
        Error::UnsupportedFormat {
            direction: "destination",
            format: format.into(),
        }
    }

    /// Convenience constructor for [`Error::Launch`].
    pub fn launch(tool: impl Into<String>, source: std::io::Error) -> Self {
        Error::Launch {
            tool: tool.into(),
            source,
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Cloneable snapshot of an error captured inside a worker.
///
/// Workers never propagate errors across the task boundary; they store one
/// of these on the task and callers get it back by polling or awaiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Severity class of the original error.
    pub kind: FaultKind,
    /// Display form of the original error.
    pub message: String,
    /// Converter stdout, for conversion faults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Converter stderr, for conversion faults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<&Error> for TaskFailure {
    fn from(err: &Error) -> Self {
        match err {
            Error::TaskFailed(inner) => inner.clone(),
            Error::Conversion { stdout, stderr, .. } => TaskFailure {
                kind: FaultKind::Conversion,
                message: err.to_string(),
                stdout: Some(stdout.clone()),
                stderr: Some(stderr.clone()),
            },
            other => TaskFailure {
                kind: other.kind(),
                message: other.to_string(),
                stdout: None,
                stderr: None,
            },
        }
    }
}

impl From<TaskFailure> for Error {
    fn from(failure: TaskFailure) -> Self {
        Error::TaskFailed(failure)
    }
}
