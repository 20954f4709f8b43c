//! Converter backends and their declared capabilities.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mf_core::config::ToolsConfig;
use serde::Serialize;

use crate::command::ToolCommand;

/// What a backend can read and write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub input_formats: BTreeSet<String>,
    pub output_formats: BTreeSet<String>,
    /// Format a specialized backend emits when it cannot reach the requested
    /// output itself.
    pub intermediate_format: Option<String>,
}

impl Capabilities {
    pub fn new<I, O, S, T>(inputs: I, outputs: O) -> Self
    where
        I: IntoIterator<Item = S>,
        O: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            input_formats: inputs.into_iter().map(Into::into).collect(),
            output_formats: outputs.into_iter().map(Into::into).collect(),
            intermediate_format: None,
        }
    }

    pub fn with_intermediate(mut self, format: impl Into<String>) -> Self {
        self.intermediate_format = Some(format.into());
        self
    }

    pub fn accepts(&self, format: &str) -> bool {
        self.input_formats.contains(format)
    }

    pub fn produces(&self, format: &str) -> bool {
        self.output_formats.contains(format)
    }

    pub fn supports(&self, input: &str, output: &str) -> bool {
        self.accepts(input) && self.produces(output)
    }
}

/// An external converter program.
pub trait Backend: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> &Capabilities;

    /// Command converting `input` into `output`. The output format is implied
    /// by the output path's extension.
    fn command(&self, input: &Path, output: &Path) -> ToolCommand;
}

/// Placeholder replaced by the input path in argument templates.
pub const INPUT_PLACEHOLDER: &str = "{input}";
/// Placeholder replaced by the output path in argument templates.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Backend described by a program, an argument template and capabilities.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    work_dir: Option<PathBuf>,
    timeout: Option<Duration>,
    capabilities: Capabilities,
}

impl CommandBackend {
    pub fn new(
        name: impl Into<String>,
        program: impl Into<PathBuf>,
        args: impl IntoIterator<Item = impl Into<String>>,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            envs: Vec::new(),
            work_dir: None,
            timeout: None,
            capabilities,
        }
    }

    /// LDraw converter: `ldrconvert -v <input> <output>`, reading the parts
    /// library from `LDRAWDIR`. Converts `ldr` and `mpd` to `3ds` only.
    pub fn ldraw(tools: &ToolsConfig) -> Self {
        let caps = Capabilities::new(["ldr", "mpd"], ["3ds"]).with_intermediate("3ds");
        let mut backend = Self::new(
            "ldrconvert",
            &tools.ldrconvert_path,
            ["-v", INPUT_PLACEHOLDER, OUTPUT_PLACEHOLDER],
            caps,
        )
        .with_env("LDRAWDIR", tools.ldraw_dir.to_string_lossy());
        backend.timeout = tools.timeout();
        backend
    }

    /// General converter: `assimp export <input> <output>`. Capabilities come
    /// from probing the installed binary.
    pub fn assimp(tools: &ToolsConfig, capabilities: Capabilities) -> Self {
        let mut backend = Self::new(
            "assimp",
            &tools.assimp_path,
            ["export", INPUT_PLACEHOLDER, OUTPUT_PLACEHOLDER],
            capabilities,
        );
        backend.timeout = tools.timeout();
        backend
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Run the program from `dir`.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Backend for CommandBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn command(&self, input: &Path, output: &Path) -> ToolCommand {
        let mut cmd = ToolCommand::new(&self.program);
        for arg in &self.args {
            match arg.as_str() {
                INPUT_PLACEHOLDER => cmd.arg(input),
                OUTPUT_PLACEHOLDER => cmd.arg(output),
                other => cmd.arg(other),
            };
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.work_dir {
            cmd.current_dir(dir);
        }
        if let Some(timeout) = self.timeout {
            cmd.timeout(timeout);
        }
        cmd
    }
}
