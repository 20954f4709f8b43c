//! Route handlers for the HTTP API.

pub mod convert;
pub mod debug;
pub mod files;
pub mod formats;
pub mod hash;
pub mod health;
pub mod task;
