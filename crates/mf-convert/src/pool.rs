//! Fixed-size pool of conversion workers.
//!
//! Tasks are queued on an unbounded channel and picked up by whichever worker
//! is free. Each task body runs in its own tokio task so a panic inside a
//! converter wrapper fails that task instead of taking the worker down.

use std::sync::Arc;

use mf_core::{Error, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::task::ConversionTask;

type Queue = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Arc<ConversionTask>>>>;

#[derive(Debug)]
pub struct WorkerPool {
    tx: mpsc::UnboundedSender<Arc<ConversionTask>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    size: usize,
}

impl WorkerPool {
    /// Start `size` workers (at least one). Must be called inside a tokio
    /// runtime.
    pub fn new(size: usize, cancel: CancellationToken) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let queue: Queue = Arc::new(tokio::sync::Mutex::new(rx));
        let workers = (0..size)
            .map(|id| tokio::spawn(worker_loop(id, Arc::clone(&queue), cancel.clone())))
            .collect();
        tracing::info!(workers = size, "Conversion worker pool started");
        Self {
            tx,
            workers: Mutex::new(workers),
            cancel,
            size,
        }
    }

    /// One worker per CPU.
    pub fn with_default_size(cancel: CancellationToken) -> Self {
        Self::new(num_cpus::get(), cancel)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a task for execution.
    pub fn dispatch(&self, task: Arc<ConversionTask>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Internal("worker pool is shut down".into()));
        }
        self.tx
            .send(task)
            .map_err(|_| Error::Internal("worker pool is shut down".into()))
    }

    /// Stop accepting work and wait for the workers. A conversion already
    /// running is allowed to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::warn!("Conversion worker ended abnormally: {e}");
            }
        }
        tracing::info!("Conversion worker pool stopped");
    }
}

async fn worker_loop(id: usize, queue: Queue, cancel: CancellationToken) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => None,
            task = async { queue.lock().await.recv().await } => task,
        };
        let Some(task) = next else {
            break;
        };

        let runner = tokio::spawn(Arc::clone(&task).run());
        if let Err(e) = runner.await {
            tracing::error!(worker = id, "Conversion worker task failed: {e}");
            task.complete(Err(Error::Internal(format!("conversion worker failed: {e}"))));
        }
    }
    tracing::debug!(worker = id, "Conversion worker stopped");
}
