//! Shell-script backends and a throwaway storage root for unit tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mf_core::FormatCatalog;
use mf_store::Storage;
use tempfile::TempDir;

use crate::backend::{Backend, Capabilities};
use crate::command::ToolCommand;
use crate::context::ConversionContext;
use crate::selector::PipelineSelector;

/// Copies input to output, appending a line to the counter file first.
/// Output extensions `.fail` and `.slow` make it exit 3 or sleep.
const SCRIPT: &str = r#"echo run >> "$3"
case "$2" in
  *.fail) echo "cannot convert" >&2; exit 3 ;;
  *.slow) sleep 0.5 ;;
esac
cp "$1" "$2""#;

#[derive(Debug)]
pub(crate) struct ScriptBackend {
    name: &'static str,
    capabilities: Capabilities,
    counter: PathBuf,
}

impl Backend for ScriptBackend {
    fn name(&self) -> &str {
        self.name
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn command(&self, input: &Path, output: &Path) -> ToolCommand {
        if output.extension().is_some_and(|ext| ext == "missing") {
            return ToolCommand::new("/nonexistent/meshforge-converter");
        }
        let mut cmd = ToolCommand::new("sh");
        cmd.args(["-c", SCRIPT, "sh"])
            .arg(input)
            .arg(output)
            .arg(&self.counter);
        cmd
    }
}

/// Number of backend invocations so far.
pub(crate) struct Counter(PathBuf);

impl Counter {
    pub(crate) fn count(&self) -> usize {
        std::fs::read_to_string(&self.0)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }
}

pub(crate) struct Fixture {
    pub ctx: Arc<ConversionContext>,
    pub counter: Counter,
    pub _dir: TempDir,
}

pub(crate) fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(Storage::open(dir.path().join("files")).unwrap());
    let counter = dir.path().join("runs");

    let specialized = ScriptBackend {
        name: "ldrconvert",
        capabilities: Capabilities::new(["ldr", "mpd"], ["3ds"]).with_intermediate("3ds"),
        counter: counter.clone(),
    };
    let general = ScriptBackend {
        name: "assimp",
        capabilities: Capabilities::new(
            ["3ds", "ply", "obj"],
            ["obj", "stl", "ply", "fail", "slow", "missing"],
        ),
        counter: counter.clone(),
    };

    let mut formats = FormatCatalog::default();
    for input in ["3ds", "ply", "obj"] {
        formats.add_input(input, &format!(".{input}"));
    }
    for output in ["obj", "stl", "ply", "fail", "slow", "missing"] {
        formats.add_output(output, output, "");
    }

    let selector = PipelineSelector::new(Arc::new(specialized), Arc::new(general));
    let ctx = ConversionContext::new(storage, selector, formats).unwrap();
    Fixture {
        ctx: Arc::new(ctx),
        counter: Counter(counter),
        _dir: dir,
    }
}
