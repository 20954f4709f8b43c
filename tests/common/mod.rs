//! Shared test harness for integration tests.
//!
//! [`install_tools`] writes shell-script stand-ins for `ldrconvert` and
//! `assimp` into a scratch directory and returns a [`Config`] pointing at
//! them. [`TestHarness::start`] builds the full service on top of that and
//! serves the router on a random port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mf_convert::ConversionService;
use mf_core::config::Config;
use mf_server::context::AppContext;
use mf_server::router::build_router;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// `ldrconvert -v <in> <out>`: prefixes the model with a marker line. Input
/// containing `SLOW` takes a second, input containing `BROKEN` fails.
const LDRCONVERT: &str = r#"#!/bin/sh
echo "ldrconvert $2 $3" >> "$(dirname "$0")/runs.log"
if grep -q BROKEN "$2"; then
  echo "ldrconvert: cannot parse model" >&2
  exit 2
fi
if grep -q SLOW "$2"; then
  sleep 1
fi
{ echo "3ds from $LDRAWDIR"; cat "$2"; } > "$3"
"#;

/// Answers the three probing commands and `export <in> <out>`.
const ASSIMP: &str = r#"#!/bin/sh
case "$1" in
  listexport) printf 'obj\nstlb\n' ;;
  exportinfo)
    case "$2" in
      obj) printf 'obj\n*.obj\nWavefront OBJ format\n' ;;
      stlb) printf 'stlb\n*.stl\nStereolithography (binary)\n' ;;
      *) exit 1 ;;
    esac ;;
  listext) printf '*.3ds;*.obj;*.ply;*.png' ;;
  export)
    echo "assimp $2 $3" >> "$(dirname "$0")/runs.log"
    if grep -q BROKEN "$2"; then
      echo "assimp: unreadable input" >&2
      exit 2
    fi
    { echo "exported by assimp"; cat "$2"; } > "$3" ;;
  *) exit 1 ;;
esac
"#;

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, body).expect("failed to write script");
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .expect("failed to chmod script");
}

/// Install the fake converters under `dir/bin` and return a config using
/// them with storage under `dir/files`.
pub fn install_tools(dir: &Path) -> Config {
    let bin = dir.join("bin");
    std::fs::create_dir_all(&bin).expect("failed to create bin dir");
    write_script(&bin.join("ldrconvert"), LDRCONVERT);
    write_script(&bin.join("assimp"), ASSIMP);
    let ldraw = dir.join("ldraw");
    std::fs::create_dir_all(&ldraw).expect("failed to create ldraw dir");

    let mut config = Config::default();
    config.server.host = "127.0.0.1".into();
    config.server.port = 0;
    config.storage.root = dir.join("files");
    config.tools.ldrconvert_path = bin.join("ldrconvert");
    config.tools.assimp_path = bin.join("assimp");
    config.tools.ldraw_dir = ldraw;
    config.tasks.workers = Some(2);
    config
}

/// Converter invocations so far, one `"<tool> <in> <out>"` line each.
pub fn runs(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("bin").join("runs.log"))
        .map(|s| s.lines().map(String::from).collect())
        .unwrap_or_default()
}

pub struct TestHarness {
    pub dir: TempDir,
    pub config: Config,
    pub service: Arc<ConversionService>,
    pub addr: SocketAddr,
    cancel: CancellationToken,
}

impl TestHarness {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start with a config adjusted by `tweak`.
    pub async fn start_with(tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut config = install_tools(dir.path());
        tweak(&mut config);

        let cancel = CancellationToken::new();
        let service = Arc::new(
            ConversionService::open(&config, cancel.clone())
                .await
                .expect("failed to open service"),
        );
        let app = build_router(AppContext::new(Arc::clone(&service), config.clone()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        let graceful = cancel.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { graceful.cancelled().await })
                .await
                .ok();
        });

        Self {
            dir,
            config,
            service,
            addr,
            cancel,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn storage_root(&self) -> PathBuf {
        self.config.storage.root.clone()
    }

    pub fn runs(&self) -> Vec<String> {
        runs(self.dir.path())
    }

    /// Poll `/api/task/{id}` until it reports finished.
    pub async fn wait_for_task(&self, id: &str) -> reqwest::Response {
        let client = reqwest::Client::new();
        for _ in 0..100 {
            let resp = client
                .get(self.url(&format!("/api/task/{id}")))
                .send()
                .await
                .expect("request failed");
            if resp.status() != 200 {
                return resp;
            }
            let body: serde_json::Value = resp.json().await.expect("invalid json");
            if body["taskFinished"] == true {
                return client
                    .get(self.url(&format!("/api/task/{id}")))
                    .send()
                    .await
                    .expect("request failed");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("task {id} did not finish");
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
