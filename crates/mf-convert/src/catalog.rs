//! Discovering what the installed assimp binary can read and write.
//!
//! - `assimp listexport` prints one export format id per line.
//! - `assimp exportinfo <id>` prints the id, the file extension and a
//!   description on three lines.
//! - `assimp listext` prints the importable extensions as `*.a;*.b;...`.

use std::path::Path;

use mf_core::config::ToolsConfig;
use mf_core::{FormatCatalog, Result};

use crate::backend::Capabilities;
use crate::command::ToolCommand;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFormat {
    pub id: String,
    /// Lowercase extension without the leading dot; used as the format name.
    pub ext: String,
    pub description: String,
}

fn normalize_ext(raw: &str) -> String {
    let raw = raw.trim();
    let raw = raw
        .strip_prefix("*.")
        .or_else(|| raw.strip_prefix('.'))
        .unwrap_or(raw);
    raw.to_lowercase()
}

pub fn parse_listexport(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_exportinfo(stdout: &str) -> Option<ExportFormat> {
    let mut lines = stdout.lines().map(str::trim);
    let id = lines.next().filter(|l| !l.is_empty())?.to_string();
    let ext = normalize_ext(lines.next()?);
    if ext.is_empty() {
        return None;
    }
    let description = lines.next().unwrap_or_default().to_string();
    Some(ExportFormat {
        id,
        ext,
        description,
    })
}

pub fn parse_listext(stdout: &str) -> Vec<String> {
    stdout
        .split(';')
        .map(normalize_ext)
        .filter(|e| !e.is_empty())
        .collect()
}

fn assimp(tools: &ToolsConfig, cwd: &Path) -> ToolCommand {
    let mut cmd = ToolCommand::new(&tools.assimp_path);
    cmd.current_dir(cwd);
    if let Some(timeout) = tools.timeout() {
        cmd.timeout(timeout);
    }
    cmd
}

/// Ask assimp for its formats, record them in `catalog` and return the
/// matching capabilities.
///
/// Fails if assimp cannot be run at all; a single unreadable `exportinfo`
/// only skips that format.
pub async fn probe_assimp(
    tools: &ToolsConfig,
    cwd: &Path,
    catalog: &mut FormatCatalog,
) -> Result<Capabilities> {
    let mut caps = Capabilities::default();

    let listing = assimp(tools, cwd).arg("listexport").execute().await?;
    for id in parse_listexport(&listing.stdout) {
        let info = match assimp(tools, cwd).arg("exportinfo").arg(&id).execute().await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(format = %id, "assimp exportinfo failed: {e}");
                continue;
            }
        };
        let Some(format) = parse_exportinfo(&info.stdout) else {
            tracing::warn!(format = %id, "Unreadable assimp exportinfo output");
            continue;
        };
        catalog.add_output(&format.ext, &format.ext, &format.description);
        caps.output_formats.insert(format.ext);
    }

    let listing = assimp(tools, cwd).arg("listext").execute().await?;
    for ext in parse_listext(&listing.stdout) {
        catalog.add_input(&ext, &format!(".{ext}"));
        caps.input_formats.insert(ext);
    }

    tracing::info!(
        inputs = caps.input_formats.len(),
        outputs = caps.output_formats.len(),
        "Probed assimp formats"
    );
    Ok(caps)
}
