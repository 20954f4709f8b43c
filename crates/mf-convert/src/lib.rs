//! mf-convert: turning conversion requests into files.
//!
//! Requests are fingerprinted and registered in a [`TaskRegistry`] so that
//! identical requests share one [`ConversionTask`]. Tasks run on a
//! [`WorkerPool`], stage external converters chosen by a
//! [`PipelineSelector`], and leave their result either in the content store
//! or as a bare file. [`ConversionService`] ties it together.

pub mod backend;
pub mod catalog;
pub mod command;
pub mod context;
pub mod pool;
pub mod registry;
pub mod request;
pub mod selector;
pub mod service;
pub mod task;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{Backend, Capabilities, CommandBackend};
pub use command::{ToolCommand, ToolOutput};
pub use context::ConversionContext;
pub use pool::WorkerPool;
pub use registry::{start_sweeper, Task, TaskRegistry, DEFAULT_TTL};
pub use request::{ConversionRequest, ConversionSource};
pub use selector::{PipelineSelector, Stage};
pub use service::{ConversionService, DebugTask, StoredFile, SyncPointReport, AUTO_FORMAT};
pub use task::{ConversionTask, TaskOutput, TaskSnapshot, TaskState};
pub use tools::{check_tools, ToolInfo};
