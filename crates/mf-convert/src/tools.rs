//! Locating the external converter binaries.

use std::path::PathBuf;

use mf_core::config::ToolsConfig;
use serde::{Deserialize, Serialize};

/// Availability of one converter binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// Resolved path to the executable.
    pub path: Option<PathBuf>,
}

/// Resolve each configured converter through `PATH`. Absolute paths are
/// checked as given.
pub fn check_tools(tools: &ToolsConfig) -> Vec<ToolInfo> {
    [
        ("ldrconvert", &tools.ldrconvert_path),
        ("assimp", &tools.assimp_path),
    ]
    .into_iter()
    .map(|(name, configured)| {
        let path = which::which(configured).ok();
        ToolInfo {
            name: name.to_string(),
            available: path.is_some(),
            path,
        }
    })
    .collect()
}
