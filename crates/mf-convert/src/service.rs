//! The conversion service: submit, poll, await and fetch.
//!
//! This is the one object the HTTP layer and the CLI talk to. It owns the
//! shared [`ConversionContext`], the task registry and the worker pool.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mf_core::config::{Config, TaskConfig};
use mf_core::{ContentHash, Error, Fingerprint, FormatCatalog, Result};
use mf_store::{Storage, SyncReport};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::backend::{Capabilities, CommandBackend};
use crate::catalog::probe_assimp;
use crate::context::ConversionContext;
use crate::pool::WorkerPool;
use crate::registry::{Task, TaskRegistry};
use crate::request::{ConversionRequest, ConversionSource};
use crate::selector::PipelineSelector;
use crate::task::{ConversionTask, TaskOutput, TaskSnapshot};

/// Input format name asking for the format to be derived from the URI.
pub const AUTO_FORMAT: &str = "auto";

/// A cached result located by its hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub hash: ContentHash,
    pub path: PathBuf,
    /// Download name recorded when the file was cached, or the hash.
    pub filename: String,
    pub mimetype: String,
}

/// What a sync point did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncPointReport {
    pub store: SyncReport,
    pub swept: usize,
}

/// Task listing entry for the debug endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugTask {
    #[serde(flatten)]
    pub task: TaskSnapshot,
    pub task_expired: bool,
}

#[derive(Debug)]
pub struct ConversionService {
    ctx: Arc<ConversionContext>,
    registry: Arc<TaskRegistry<ConversionTask>>,
    pool: WorkerPool,
}

impl ConversionService {
    /// Wire a service around an existing context. Starts the worker pool, so
    /// this must run inside a tokio runtime.
    pub fn new(ctx: Arc<ConversionContext>, tasks: &TaskConfig, cancel: CancellationToken) -> Self {
        let pool = match tasks.workers {
            Some(n) => WorkerPool::new(n, cancel),
            None => WorkerPool::with_default_size(cancel),
        };
        Self {
            ctx,
            registry: Arc::new(TaskRegistry::new(tasks.ttl())),
            pool,
        }
    }

    /// Open the storage root, probe the general converter and start the
    /// workers.
    ///
    /// A general converter that cannot be probed is logged and treated as
    /// supporting nothing; the specialized pair still works.
    pub async fn open(config: &Config, cancel: CancellationToken) -> Result<Self> {
        let root = config.storage.root.clone();
        let storage = tokio::task::spawn_blocking(move || Storage::open(root))
            .await
            .map_err(|e| Error::Internal(format!("storage open task failed: {e}")))??;
        let storage = Arc::new(storage);
        tracing::info!(root = %config.storage.root.display(), "Storage opened");

        let mut formats = FormatCatalog::default();
        let general_caps = match probe_assimp(&config.tools, storage.tmp_dir(), &mut formats).await {
            Ok(caps) => caps,
            Err(e) => {
                tracing::error!("Could not probe assimp, general conversions disabled: {e}");
                Capabilities::default()
            }
        };

        let specialized = CommandBackend::ldraw(&config.tools).in_dir(storage.tmp_dir());
        let general = CommandBackend::assimp(&config.tools, general_caps).in_dir(storage.tmp_dir());
        let selector = PipelineSelector::new(Arc::new(specialized), Arc::new(general));

        let ctx = ConversionContext::new(storage, selector, formats)?;
        Ok(Self::new(Arc::new(ctx), &config.tasks, cancel))
    }

    pub fn context(&self) -> &Arc<ConversionContext> {
        &self.ctx
    }

    pub fn formats(&self) -> &FormatCatalog {
        &self.ctx.formats
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.ctx.storage
    }

    pub fn registry(&self) -> &Arc<TaskRegistry<ConversionTask>> {
        &self.registry
    }

    /// Replace an `auto` input format with the one implied by the URI path.
    pub fn resolve_input_format(&self, mut request: ConversionRequest) -> Result<ConversionRequest> {
        if request.input_format != AUTO_FORMAT {
            return Ok(request);
        }
        let derived = match (&request.source, request.uri_path()) {
            (ConversionSource::Uri(_), Some(path)) => self
                .ctx
                .formats
                .derive_format(&path)
                .map(|(name, _)| name.to_string()),
            _ => None,
        };
        match derived {
            Some(name) => {
                request.input_format = name;
                Ok(request)
            }
            None => Err(Error::Validation(match &request.source {
                ConversionSource::Uri(uri) => {
                    format!("Could not derive input file format from URI {uri}")
                }
                ConversionSource::Inline(_) => {
                    "Input format auto needs a URI source".to_string()
                }
            })),
        }
    }

    /// Everything that can be rejected without running anything.
    fn check(&self, request: &ConversionRequest) -> Result<()> {
        if self.ctx.formats.get(&request.input_format).is_none() {
            return Err(Error::unsupported_source(&request.input_format));
        }
        if self.ctx.formats.get(&request.output_format).is_none() {
            return Err(Error::unsupported_destination(&request.output_format));
        }
        request.validate()?;
        self.ctx
            .selector
            .select(&request.input_format, &request.output_format)?;
        Ok(())
    }

    /// Register `request` (or join an identical one already registered) and
    /// make sure it is running.
    pub fn submit(&self, request: ConversionRequest) -> Result<Arc<ConversionTask>> {
        let request = self.resolve_input_format(request)?;
        self.check(&request)?;

        let candidate = Arc::new(ConversionTask::new(request, Arc::clone(&self.ctx)));
        let task = self.registry.get_or_register(candidate);
        task.start(&self.pool);
        Ok(task)
    }

    /// Non-blocking view of a registered task.
    pub fn poll(&self, fingerprint: &Fingerprint) -> Option<TaskSnapshot> {
        let task = self.registry.get(fingerprint)?;
        if task.is_finished() {
            task.touch();
        }
        Some(task.snapshot())
    }

    /// Wait up to `timeout` (forever when `None`) for a task.
    ///
    /// `Ok(None)` means it is still running. A failed task comes back as
    /// [`Error::TaskFailed`] with its original fault class.
    pub async fn await_and_consume(
        &self,
        fingerprint: &Fingerprint,
        timeout: Option<Duration>,
    ) -> Result<Option<TaskOutput>> {
        let task = self
            .registry
            .get(fingerprint)
            .ok_or_else(|| Error::not_found("task", fingerprint))?;
        if task.stop(timeout).await {
            return Ok(None);
        }
        task.touch();
        task.result().map(Some)
    }

    /// Locate a cached result.
    pub fn fetch_by_hash(&self, hash: &ContentHash) -> Result<StoredFile> {
        let entry = self
            .ctx
            .storage
            .store()
            .get(hash)
            .filter(|e| e.exists())
            .ok_or_else(|| Error::not_found("file", hash))?;

        let filename = entry
            .cached_metadata()
            .get("filename")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| hash.to_string());
        let mimetype = self
            .ctx
            .formats
            .derive_format(&filename)
            .map(|(_, format)| format.mimetype.clone())
            .unwrap_or_else(|| self.ctx.formats.mimetype("").to_string());

        Ok(StoredFile {
            hash: hash.clone(),
            path: entry.path().to_path_buf(),
            filename,
            mimetype,
        })
    }

    /// Flush deferred removals, reconcile the store with disk and sweep
    /// expired tasks. Blocking; async callers go through `spawn_blocking`.
    pub fn sync_point(&self) -> Result<SyncPointReport> {
        let store = self.ctx.storage.sync()?;
        let swept = self.registry.sweep_expired(true);
        Ok(SyncPointReport { store, swept })
    }

    /// Every registered task, oldest first.
    pub fn debug_tasks(&self) -> Vec<DebugTask> {
        let ttl = self.registry.ttl();
        let mut tasks: Vec<DebugTask> = self
            .registry
            .snapshot()
            .into_iter()
            .map(|task| DebugTask {
                task_expired: task.is_expired(ttl),
                task: task.snapshot(),
            })
            .collect();
        tasks.sort_by(|a, b| b.task.task_age.total_cmp(&a.task.task_age));
        tasks
    }

    /// Convert on the caller's task, bypassing the registry and the pool.
    pub async fn run_direct(&self, request: ConversionRequest) -> Result<TaskOutput> {
        let request = self.resolve_input_format(request)?;
        self.check(&request)?;
        ConversionTask::new(request, Arc::clone(&self.ctx))
            .run_direct()
            .await
    }

    /// Stop the workers after their current conversions.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskState;
    use crate::testing::{fixture, Fixture};
    use mf_core::FaultKind;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(ctx: Arc<ConversionContext>) -> ConversionService {
        let tasks = TaskConfig {
            workers: Some(4),
            ..TaskConfig::default()
        };
        ConversionService::new(ctx, &tasks, CancellationToken::new())
    }

    #[tokio::test]
    async fn concurrent_identical_submits_coalesce() {
        let Fixture { ctx, counter, _dir } = fixture();
        let service = Arc::new(service(ctx));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move {
                    let request = ConversionRequest::from_bytes("ply", "slow", "mesh").cached(true);
                    let task = service.submit(request).unwrap();
                    service
                        .await_and_consume(task.fingerprint(), None)
                        .await
                        .unwrap()
                        .unwrap()
                })
            })
            .collect();

        let mut outputs = Vec::new();
        for h in handles {
            outputs.push(h.await.unwrap());
        }
        assert!(outputs.iter().all(|o| o == &outputs[0]));
        assert_eq!(counter.count(), 1);
        assert_eq!(service.registry().len(), 1);
    }

    #[tokio::test]
    async fn await_with_timeout_reports_still_running() {
        let Fixture { ctx, _dir, .. } = fixture();
        let service = service(ctx);
        let task = service
            .submit(ConversionRequest::from_bytes("ply", "slow", "mesh"))
            .unwrap();

        let fp = task.fingerprint().clone();
        assert_eq!(
            service
                .await_and_consume(&fp, Some(Duration::from_millis(20)))
                .await
                .unwrap(),
            None
        );
        let snapshot = service.poll(&fp).unwrap();
        assert!(!snapshot.task_finished);
        assert_eq!(snapshot.task_state, TaskState::Running);

        let output = service.await_and_consume(&fp, None).await.unwrap();
        assert!(matches!(output, Some(TaskOutput::File { .. })));
        assert!(service.poll(&fp).unwrap().task_finished);
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let Fixture { ctx, _dir, .. } = fixture();
        let service = service(ctx);
        let fp = Fingerprint::of_parts(["nothing"]);
        assert!(service.poll(&fp).is_none());
        let err = service.await_and_consume(&fp, None).await.unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn submit_rejects_unsupported_formats_up_front() {
        let Fixture { ctx, counter, _dir } = fixture();
        let service = service(ctx);

        let err = service
            .submit(ConversionRequest::from_bytes("xyz", "obj", "x"))
            .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported source format xyz");

        let err = service
            .submit(ConversionRequest::from_bytes("ldr", "blend", "x"))
            .unwrap_err();
        assert_eq!(err.kind(), FaultKind::Client);

        let err = service
            .submit(ConversionRequest::from_bytes("ldr", "3ds", ""))
            .unwrap_err();
        assert_eq!(err.to_string(), "Validation error: Data missing in POST request");

        assert!(service.registry().is_empty());
        assert_eq!(counter.count(), 0);
    }

    #[tokio::test]
    async fn failed_task_reraises_with_fault_kind() {
        let Fixture { ctx, _dir, .. } = fixture();
        let service = service(ctx);
        let task = service
            .submit(ConversionRequest::from_bytes("ply", "fail", "x"))
            .unwrap();
        let err = service
            .await_and_consume(task.fingerprint(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TaskFailed(_)));
        assert_eq!(err.kind(), FaultKind::Conversion);

        let snapshot = service.poll(task.fingerprint()).unwrap();
        assert_eq!(snapshot.task_status.as_deref(), Some("Conversion failed"));
        assert!(snapshot.error.unwrap().message.contains("exited with"));
    }

    #[tokio::test]
    async fn downloads_uri_and_derives_auto_format() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models/car.ldr"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"0 FILE car.ldr".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let Fixture { ctx, _dir, .. } = fixture();
        let service = service(ctx);
        let uri = format!("{}/models/car.ldr", server.uri());
        let task = service
            .submit(ConversionRequest::from_uri("auto", "3ds", &uri).cached(true))
            .unwrap();
        assert_eq!(task.request().input_format, "ldr");

        let Some(TaskOutput::Cached { hash }) =
            service.await_and_consume(task.fingerprint(), None).await.unwrap()
        else {
            panic!("expected a cached result");
        };
        let stored = service.fetch_by_hash(&hash).unwrap();
        assert_eq!(stored.filename, "car.3ds");
        assert_eq!(std::fs::read(&stored.path).unwrap(), b"0 FILE car.ldr");
    }

    #[tokio::test]
    async fn http_error_is_client_fault() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let Fixture { ctx, counter, _dir } = fixture();
        let service = service(ctx);
        let task = service
            .submit(ConversionRequest::from_uri(
                "ldr",
                "3ds",
                format!("{}/missing.ldr", server.uri()),
            ))
            .unwrap();
        let err = service
            .await_and_consume(task.fingerprint(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FaultKind::Client);
        assert_eq!(counter.count(), 0);
    }

    #[tokio::test]
    async fn auto_without_known_extension_is_rejected() {
        let Fixture { ctx, _dir, .. } = fixture();
        let service = service(ctx);
        let err = service
            .submit(ConversionRequest::from_uri("auto", "3ds", "http://host/readme.txt"))
            .unwrap_err();
        assert!(err.to_string().contains("Could not derive input file format"));
    }

    #[tokio::test]
    async fn fetch_unknown_hash_is_not_found() {
        let Fixture { ctx, _dir, .. } = fixture();
        let service = service(ctx);
        let hash = mf_store::hash_bytes(b"never stored");
        assert_eq!(service.fetch_by_hash(&hash).unwrap_err().http_status(), 404);
    }

    #[tokio::test]
    async fn sync_point_sweeps_and_removes_outputs() {
        let Fixture { ctx, _dir, .. } = fixture();
        let tasks = TaskConfig {
            ttl_secs: 0,
            workers: Some(1),
            ..TaskConfig::default()
        };
        let service = ConversionService::new(ctx, &tasks, CancellationToken::new());

        let task = service
            .submit(ConversionRequest::from_bytes("ldr", "3ds", "0 FILE a.ldr").cached(true))
            .unwrap();
        let Some(TaskOutput::Cached { hash }) =
            service.await_and_consume(task.fingerprint(), None).await.unwrap()
        else {
            panic!("expected a cached result");
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let report = service.sync_point().unwrap();
        assert_eq!(report.swept, 1);
        assert!(service.registry().is_empty());
        // Removal is deferred until the next sync point.
        assert!(service.storage().store().contains(&hash));
        service.sync_point().unwrap();
        assert!(!service.storage().store().contains(&hash));
    }

    #[tokio::test]
    async fn running_task_survives_sync_point() {
        let Fixture { ctx, _dir, .. } = fixture();
        let tasks = TaskConfig {
            ttl_secs: 0,
            workers: Some(1),
            ..TaskConfig::default()
        };
        let service = ConversionService::new(ctx, &tasks, CancellationToken::new());
        let task = service
            .submit(ConversionRequest::from_bytes("ply", "slow", "x"))
            .unwrap();
        assert!(task.stop(Some(Duration::from_millis(20))).await);

        assert_eq!(service.sync_point().unwrap().swept, 0);
        assert_eq!(service.registry().len(), 1);
        let listing = service.debug_tasks();
        assert_eq!(listing.len(), 1);
        assert!(!listing[0].task_expired);
    }

    #[tokio::test]
    async fn run_direct_bypasses_registry() {
        let Fixture { ctx, counter, _dir } = fixture();
        let service = service(ctx);
        let output = service
            .run_direct(ConversionRequest::from_bytes("ldr", "obj", "0 FILE a.ldr"))
            .await
            .unwrap();
        let TaskOutput::File { path, filename } = output else {
            panic!("expected a bare file");
        };
        assert_eq!(filename, "output.obj");
        assert!(path.exists());
        assert!(service.registry().is_empty());
        assert_eq!(counter.count(), 2);
    }
}
