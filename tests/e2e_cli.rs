//! CLI end-to-end tests
//!
//! Tests for the meshforge command-line interface.

mod common;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the meshforge binary
#[allow(deprecated)]
fn meshforge_cmd() -> Command {
    Command::cargo_bin("meshforge").unwrap()
}

/// Write a config using the fake converters and return its path.
fn write_config(dir: &Path) -> PathBuf {
    let config = common::install_tools(dir);
    let path = dir.join("config.json");
    fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    path
}

#[test]
fn test_cli_no_args_shows_help() {
    let mut cmd = meshforge_cmd();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_version_command() {
    let mut cmd = meshforge_cmd();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "meshforge {}",
            env!("CARGO_PKG_VERSION")
        )));
}

#[test]
fn test_cli_validate_valid_config() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());

    let mut cmd = meshforge_cmd();
    cmd.arg("validate")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("Storage root"));
}

#[test]
fn test_cli_validate_invalid_json() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("broken.json");
    fs::write(&config, "{ not json").unwrap();

    let mut cmd = meshforge_cmd();
    cmd.arg("validate")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("config parse error"));
}

#[test]
fn test_cli_validate_reads_settings_env() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());

    let mut cmd = meshforge_cmd();
    cmd.env("MESHFORGE_SETTINGS", &config)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains(config.display().to_string()));
}

#[test]
fn test_cli_check_tools_with_fake_converters() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());

    let mut cmd = meshforge_cmd();
    cmd.arg("--config")
        .arg(&config)
        .arg("check-tools")
        .assert()
        .success()
        .stdout(predicate::str::contains("✓ ldrconvert"))
        .stdout(predicate::str::contains("✓ assimp"))
        .stdout(predicate::str::contains("All required tools are available"));
}

#[test]
fn test_cli_check_tools_reports_missing() {
    let dir = tempdir().unwrap();
    let mut config = common::install_tools(dir.path());
    config.tools.assimp_path = dir.path().join("nowhere").join("assimp");
    let path = dir.path().join("config.json");
    fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

    let mut cmd = meshforge_cmd();
    cmd.arg("--config")
        .arg(&path)
        .arg("check-tools")
        .assert()
        .success()
        .stdout(predicate::str::contains("✗ assimp"))
        .stdout(predicate::str::contains("Some tools are missing"));
}

#[test]
fn test_cli_formats_json_includes_probed_formats() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());

    let output = meshforge_cmd()
        .arg("--config")
        .arg(&config)
        .args(["formats", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let catalog: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(catalog["formats"]["stl"]["ext"], ".stl");
    assert_eq!(catalog["formats"]["ldr"]["ext"], ".ldr");
}

#[test]
fn test_cli_convert_local_file() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());
    let input = dir.path().join("car.ldr");
    fs::write(&input, "0 FILE car.ldr\n").unwrap();
    let output = dir.path().join("car.obj");

    let mut cmd = meshforge_cmd();
    cmd.arg("--config")
        .arg(&config)
        .arg("convert")
        .arg(&input)
        .args(["--to", "obj", "--output"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("car.obj"));

    let converted = fs::read_to_string(&output).unwrap();
    assert!(converted.starts_with("exported by assimp\n3ds from "));
    assert!(converted.ends_with("0 FILE car.ldr\n"));
    assert_eq!(common::runs(dir.path()).len(), 2);
}

#[test]
fn test_cli_convert_into_cache_prints_hash() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());
    let input = dir.path().join("car.ldr");
    fs::write(&input, "0 FILE car.ldr\n").unwrap();

    let output = meshforge_cmd()
        .arg("--config")
        .arg(&config)
        .arg("convert")
        .arg(&input)
        .args(["--to", "3ds", "--cache"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let hash = String::from_utf8(output.stdout).unwrap().trim().to_string();
    assert_eq!(hash.len(), 64);
    assert!(dir.path().join("files").join(&hash).is_file());
}

#[test]
fn test_cli_convert_failure_exits_nonzero() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());
    let input = dir.path().join("broken.ldr");
    fs::write(&input, "0 BROKEN\n").unwrap();

    let mut cmd = meshforge_cmd();
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("convert")
        .arg(&input)
        .args(["--to", "3ds"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Conversion failed"));
    assert!(!dir.path().join("broken.3ds").exists());
}

#[test]
fn test_cli_convert_unknown_extension_needs_from() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());
    let input = dir.path().join("model.xyz");
    fs::write(&input, "data").unwrap();

    let mut cmd = meshforge_cmd();
    cmd.arg("--config")
        .arg(&config)
        .arg("convert")
        .arg(&input)
        .args(["--to", "3ds"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("pass --from"));
}
