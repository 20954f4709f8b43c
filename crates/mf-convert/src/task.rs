//! A single conversion and its lifecycle.
//!
//! ```text
//! Created --start()--> Running --worker ends--> Succeeded | Failed
//! ```
//!
//! The worker owns every temp file it creates. Errors never cross the async
//! boundary: they are captured on the task as a [`TaskFailure`] and handed
//! back to whoever polls or awaits it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mf_core::{ContentHash, Error, Fingerprint, MetaValue, Metadata, Result, TaskFailure};
use mf_store::{hash_file, EntrySource, OpenMode, Removal, ScopedTempFile};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::context::ConversionContext;
use crate::pool::WorkerPool;
use crate::registry::Task;
use crate::request::{ConversionRequest, ConversionSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }
}

/// Result of a successful conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutput {
    /// Stored in the content store under `hash`.
    Cached { hash: ContentHash },
    /// A bare file outside the store. `filename` is the suggested download
    /// name.
    File { path: PathBuf, filename: String },
}

/// Point-in-time view of a task, as reported to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub task_id: Fingerprint,
    pub task_state: TaskState,
    pub task_status: Option<String>,
    pub task_finished: bool,
    /// Seconds since the task was last touched.
    pub task_age: f64,
    pub hash: Option<ContentHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip)]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
}

#[derive(Debug)]
struct TaskInner {
    state: TaskState,
    status: Option<String>,
    error: Option<TaskFailure>,
    output: Option<TaskOutput>,
    /// Whether `output` is ours to delete. False for a cache entry that
    /// already existed when this task finished.
    owns_output: bool,
    touched: Instant,
}

/// One conversion request being (or having been) executed.
#[derive(Debug)]
pub struct ConversionTask {
    fingerprint: Fingerprint,
    request: ConversionRequest,
    ctx: Arc<ConversionContext>,
    inner: Mutex<TaskInner>,
    done: watch::Sender<bool>,
}

impl ConversionTask {
    pub fn new(request: ConversionRequest, ctx: Arc<ConversionContext>) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            fingerprint: request.fingerprint(),
            request,
            ctx,
            inner: Mutex::new(TaskInner {
                state: TaskState::Created,
                status: None,
                error: None,
                output: None,
                owns_output: false,
                touched: Instant::now(),
            }),
            done,
        }
    }

    pub fn request(&self) -> &ConversionRequest {
        &self.request
    }

    pub fn state(&self) -> TaskState {
        self.inner.lock().state
    }

    pub fn status(&self) -> Option<String> {
        self.inner.lock().status.clone()
    }

    pub fn error(&self) -> Option<TaskFailure> {
        self.inner.lock().error.clone()
    }

    pub fn output(&self) -> Option<TaskOutput> {
        self.inner.lock().output.clone()
    }

    /// Time since the task was last touched.
    pub fn age(&self) -> Duration {
        self.inner.lock().touched.elapsed()
    }

    /// Dispatch the task to `pool`. Only the first call has any effect
    /// besides refreshing the timestamp.
    pub fn start(self: &Arc<Self>, pool: &WorkerPool) {
        let dispatch = {
            let mut inner = self.inner.lock();
            inner.touched = Instant::now();
            if inner.state == TaskState::Created {
                inner.state = TaskState::Running;
                true
            } else {
                false
            }
        };

        if dispatch {
            tracing::info!(fingerprint = %self.fingerprint, "Starting conversion task");
            if let Err(e) = pool.dispatch(Arc::clone(self)) {
                self.complete(Err(e));
            }
        }
    }

    /// Run the conversion on the caller's task, without the worker pool.
    ///
    /// Errors are returned as they happened rather than as
    /// [`Error::TaskFailed`].
    pub async fn run_direct(&self) -> Result<TaskOutput> {
        {
            let mut inner = self.inner.lock();
            if inner.state != TaskState::Created {
                return Err(Error::Internal(format!(
                    "task {} was already started",
                    self.fingerprint
                )));
            }
            inner.state = TaskState::Running;
            inner.touched = Instant::now();
        }

        match self.execute().await {
            Ok((output, owned)) => {
                self.finish(Ok((output.clone(), owned)));
                Ok(output)
            }
            Err(e) => {
                self.finish(Err(&e));
                Err(e)
            }
        }
    }

    /// Worker entry point.
    pub(crate) async fn run(self: Arc<Self>) {
        let result = self.execute().await;
        self.complete(result);
    }

    /// Record the outcome and signal completion. Later calls are ignored.
    pub(crate) fn complete(&self, result: Result<(TaskOutput, bool)>) {
        match result {
            Ok(done) => self.finish(Ok(done)),
            Err(e) => self.finish(Err(&e)),
        };
    }

    /// Store the first outcome under the task lock, then signal completion.
    /// Returns whether this call was the one that finished the task.
    fn finish(&self, outcome: std::result::Result<(TaskOutput, bool), &Error>) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() {
                return false;
            }
            match outcome {
                Ok((output, owned)) => {
                    tracing::info!(fingerprint = %self.fingerprint, ?output, "Conversion succeeded");
                    inner.state = TaskState::Succeeded;
                    inner.status = Some("Conversion succeeded".into());
                    inner.output = Some(output);
                    inner.owns_output = owned;
                }
                Err(err) => {
                    tracing::error!(fingerprint = %self.fingerprint, fault = %err.kind(), "Conversion failed: {err}");
                    inner.state = TaskState::Failed;
                    inner.status = Some("Conversion failed".into());
                    inner.error = Some(TaskFailure::from(err));
                }
            }
        }
        self.done.send_replace(true);
        true
    }

    /// Wait for the worker to finish, at most `timeout` when given.
    ///
    /// Returns whether the worker is still alive. Never cancels it.
    pub async fn stop(&self, timeout: Option<Duration>) -> bool {
        if self.state() == TaskState::Created {
            return true;
        }

        let mut rx = self.done.subscribe();
        let wait = async move {
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        };
        let alive = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.is_err(),
            None => {
                wait.await;
                false
            }
        };
        self.touch();
        alive
    }

    /// The outcome of a finished task. Failures come back as
    /// [`Error::TaskFailed`], keeping their fault class.
    pub fn result(&self) -> Result<TaskOutput> {
        let inner = self.inner.lock();
        if let Some(failure) = &inner.error {
            return Err(Error::TaskFailed(failure.clone()));
        }
        inner
            .output
            .clone()
            .ok_or_else(|| Error::Internal(format!("task {} has not finished", self.fingerprint)))
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let finished = self.is_finished();
        let inner = self.inner.lock();
        let (hash, path, filename) = match (&inner.output, finished) {
            (Some(TaskOutput::Cached { hash }), true) => (Some(hash.clone()), None, None),
            (Some(TaskOutput::File { path, filename }), true) => {
                (None, Some(path.clone()), Some(filename.clone()))
            }
            _ => (None, None, None),
        };
        TaskSnapshot {
            task_id: self.fingerprint.clone(),
            task_state: inner.state,
            task_status: inner.status.clone(),
            task_finished: finished,
            task_age: inner.touched.elapsed().as_secs_f64(),
            hash,
            filename,
            path,
            error: inner.error.clone(),
        }
    }

    fn set_status(&self, status: String) {
        tracing::info!(fingerprint = %self.fingerprint, "{status}");
        self.inner.lock().status = Some(status);
    }

    /// The worker body. Returns the output and whether this task owns it.
    async fn execute(&self) -> Result<(TaskOutput, bool)> {
        let ctx = &self.ctx;
        let req = &self.request;
        let (prefix, suffix) = req.temp_affixes(&ctx.formats);

        let mut input = ctx.storage.temp_file(&prefix, &suffix)?;
        match &req.source {
            ConversionSource::Uri(uri) => {
                self.set_status(format!("Downloading URI: {uri}"));
                let size = download(&ctx.http, uri, &mut input).await?;
                tracing::debug!(fingerprint = %self.fingerprint, size, "Download complete");
            }
            ConversionSource::Inline(data) => {
                let mut file = tokio::fs::File::from_std(input.open(OpenMode::Write)?);
                file.write_all(data).await?;
                file.flush().await?;
            }
        }

        self.set_status(format!(
            "Converting file from format {} to format {}",
            display_name(ctx, &req.input_format),
            display_name(ctx, &req.output_format)
        ));

        let stages = ctx.selector.select(&req.input_format, &req.output_format)?;
        let out_ext = ctx.formats.extension(&req.output_format);
        let last = stages.len().saturating_sub(1);
        for (i, stage) in stages.iter().enumerate() {
            let ext = if i == last {
                out_ext.clone()
            } else {
                ctx.formats.extension(&stage.output_format)
            };
            let mut output = ctx.storage.temp_file(&prefix, &ext)?;
            input.close_descriptor();
            output.close_descriptor();

            let (Some(src), Some(dst)) = (input.path(), output.path()) else {
                return Err(Error::Internal("conversion stage lost its files".into()));
            };
            tracing::debug!(
                fingerprint = %self.fingerprint,
                backend = stage.backend.name(),
                format = %stage.output_format,
                "Running conversion stage"
            );
            stage.backend.command(src, dst).execute().await?;

            // The previous input now sits in `output` and is removed with it.
            input.swap(&mut output);
        }

        let filename = format!("{prefix}{out_ext}");
        if req.cache_result {
            let path = owned_path(&input)?;
            let storage = Arc::clone(&ctx.storage);
            let mut metadata = Metadata::new();
            metadata.insert("filename".into(), MetaValue::from(filename));

            let (hash, created) = tokio::task::spawn_blocking(move || -> Result<_> {
                let hash = hash_file(&path)?;
                let (_, created) = storage.store().get_or_create(
                    &hash,
                    Some(metadata),
                    EntrySource::MoveFrom(path),
                )?;
                Ok((hash, created))
            })
            .await
            .map_err(|e| Error::Internal(format!("store task failed: {e}")))??;

            if created {
                input.release();
            }
            Ok((TaskOutput::Cached { hash }, created))
        } else {
            let path = input
                .release()
                .ok_or_else(|| Error::Internal("conversion result was not owned".into()))?;
            Ok((TaskOutput::File { path, filename }, true))
        }
    }
}

impl Task for ConversionTask {
    fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    fn touch(&self) {
        self.inner.lock().touched = Instant::now();
    }

    fn last_touched(&self) -> Instant {
        self.inner.lock().touched
    }

    fn is_finished(&self) -> bool {
        *self.done.borrow()
    }

    fn destroy(&self) {
        let inner = self.inner.lock();
        let removal = match (&inner.output, inner.owns_output) {
            (Some(TaskOutput::Cached { hash }), true) => Removal::Entry(hash.clone()),
            (Some(TaskOutput::File { path, .. }), true) => Removal::Path(path.clone()),
            _ => return,
        };
        tracing::debug!(fingerprint = %self.fingerprint, ?removal, "Destroying task");
        self.ctx.storage.remove_later(removal);
    }
}

fn display_name(ctx: &ConversionContext, format: &str) -> String {
    ctx.formats
        .get(format)
        .map(|f| f.name.clone())
        .unwrap_or_else(|| format.to_uppercase())
}

fn owned_path(guard: &ScopedTempFile) -> Result<PathBuf> {
    guard
        .path()
        .map(Path::to_path_buf)
        .ok_or_else(|| Error::Internal("conversion result was not owned".into()))
}

/// Stream `uri` into `target`. Transport and HTTP status errors are client
/// faults; local write errors are not.
async fn download(client: &reqwest::Client, uri: &str, target: &mut ScopedTempFile) -> Result<u64> {
    let mut response = client
        .get(uri)
        .send()
        .await
        .map_err(|e| Error::Fetch(format!("HTTP request error: {e}")))?
        .error_for_status()
        .map_err(|e| Error::Fetch(format!("HTTP error: {e}")))?;

    let mut file = tokio::fs::File::from_std(target.open(OpenMode::Write)?);
    let mut written = 0u64;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| Error::Fetch(format!("HTTP error: {e}")))?
    {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}
