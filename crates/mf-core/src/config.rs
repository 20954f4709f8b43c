//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! server, storage, tools and task sub-configs. Every section defaults
//! sensibly so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

/// Environment variable naming the config file when `--config` is absent.
pub const SETTINGS_ENV: &str = "MESHFORGE_SETTINGS";

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub tools: ToolsConfig,
    pub tasks: TaskConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Config file location from [`SETTINGS_ENV`], if set and non-empty.
    pub fn path_from_env() -> Option<PathBuf> {
        std::env::var_os(SETTINGS_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }
        if self.server.max_body_bytes == 0 {
            warnings.push("server.max_body_bytes is 0; every POST body will be rejected".into());
        }
        if self.tasks.ttl_secs == 0 {
            warnings.push("tasks.ttl_secs is 0; finished tasks are swept immediately".into());
        }
        if self.tasks.sweep_interval_secs == 0 {
            warnings.push("tasks.sweep_interval_secs is 0; the background sweeper is disabled".into());
        }
        if self.tasks.workers == Some(0) {
            warnings.push("tasks.workers is 0; at least one worker will be started".into());
        }
        if self.tools.timeout_secs == Some(0) {
            warnings.push("tools.timeout_secs is 0; every conversion will time out".into());
        }
        if !self.tools.ldraw_dir.exists() {
            warnings.push(format!(
                "tools.ldraw_dir {} does not exist; LDraw conversions will fail",
                self.tools.ldraw_dir.display()
            ));
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            max_body_bytes: 100 * 1024 * 1024,
        }
    }
}

/// Where cached files and temporaries live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/files"),
        }
    }
}

impl StorageConfig {
    /// Parent of the per-process work directories for in-flight conversions.
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }
}

/// External converter programs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ldrconvert_path: PathBuf,
    pub assimp_path: PathBuf,
    /// Passed to ldrconvert as `LDRAWDIR`.
    pub ldraw_dir: PathBuf,
    /// Kill switch for runaway converters. `None` waits forever.
    pub timeout_secs: Option<u64>,
}

fn default_ldraw_dir() -> PathBuf {
    std::env::var_os("LDRAWDIR")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/usr/share/ldraw"))
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ldrconvert_path: PathBuf::from("ldrconvert"),
            assimp_path: PathBuf::from("assimp"),
            ldraw_dir: default_ldraw_dir(),
            timeout_secs: None,
        }
    }
}

impl ToolsConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Task registry and worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Idle time after which a finished task may be swept.
    pub ttl_secs: u64,
    /// Period of the background sweeper. `0` disables it.
    pub sweep_interval_secs: u64,
    /// Worker count. `None` means one per CPU.
    pub workers: Option<usize>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            sweep_interval_secs: 60,
            workers: None,
        }
    }
}

impl TaskConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
