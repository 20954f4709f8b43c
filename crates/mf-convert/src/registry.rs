//! Registry of in-flight and recently finished tasks.
//!
//! Tasks are keyed by fingerprint; registering a task whose fingerprint is
//! already present returns the existing one, which is how identical requests
//! coalesce onto a single execution. Finished tasks that nobody has looked at
//! for longer than the TTL are swept, either at request sync points or by the
//! background task started with [`start_sweeper`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mf_core::Fingerprint;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default idle time before a finished task is swept.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Something the registry can hold.
pub trait Task: Send + Sync + 'static {
    fn fingerprint(&self) -> &Fingerprint;

    /// Refresh the last-touched timestamp.
    fn touch(&self);

    fn last_touched(&self) -> Instant;

    /// True only once the task's worker has observably terminated.
    fn is_finished(&self) -> bool;

    /// Finished and untouched for longer than `ttl`.
    fn is_expired(&self, ttl: Duration) -> bool {
        self.is_finished() && self.last_touched().elapsed() > ttl
    }

    /// Schedule whatever the task still owns for removal.
    fn destroy(&self);
}

/// Fingerprint-keyed task map behind a single lock.
#[derive(Debug)]
pub struct TaskRegistry<T> {
    tasks: Mutex<HashMap<Fingerprint, Arc<T>>>,
    ttl: Duration,
}

impl<T: Task> Default for TaskRegistry<T> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl<T: Task> TaskRegistry<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<T>> {
        self.tasks.lock().get(fingerprint).cloned()
    }

    /// Register `new` unless a task with the same fingerprint exists, in
    /// which case `new` is discarded and the existing task returned.
    pub fn get_or_register(&self, new: Arc<T>) -> Arc<T> {
        let mut tasks = self.tasks.lock();
        let task = tasks
            .entry(new.fingerprint().clone())
            .or_insert_with(|| new.clone());
        if Arc::ptr_eq(task, &new) {
            tracing::debug!(fingerprint = %new.fingerprint(), "Registered task");
        } else {
            tracing::debug!(fingerprint = %new.fingerprint(), "Coalesced onto existing task");
        }
        Arc::clone(task)
    }

    /// Unregister a task, optionally destroying it.
    pub fn remove(&self, fingerprint: &Fingerprint, destroy: bool) -> Option<Arc<T>> {
        let removed = self.tasks.lock().remove(fingerprint);
        if destroy {
            if let Some(task) = &removed {
                task.destroy();
            }
        }
        removed
    }

    /// Remove every expired task. Unfinished tasks are never removed.
    pub fn sweep_expired(&self, destroy: bool) -> usize {
        let expired: Vec<Arc<T>> = {
            let mut tasks = self.tasks.lock();
            let ids: Vec<Fingerprint> = tasks
                .iter()
                .filter(|(_, task)| task.is_expired(self.ttl))
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| tasks.remove(id)).collect()
        };

        if destroy {
            for task in &expired {
                task.destroy();
            }
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Swept expired tasks");
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// All registered tasks, in no particular order.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.tasks.lock().values().cloned().collect()
    }
}

/// Spawn a background task that sweeps `registry` every `interval` until
/// `cancel` fires.
pub fn start_sweeper<T: Task>(
    registry: Arc<TaskRegistry<T>>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    registry.sweep_expired(true);
                }
                _ = cancel.cancelled() => break,
            }
        }
        tracing::debug!("Task sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug)]
    struct FakeTask {
        id: Fingerprint,
        touched: Mutex<Instant>,
        finished: AtomicBool,
        destroyed: AtomicUsize,
    }

    impl FakeTask {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                id: Fingerprint::of_parts([name]),
                touched: Mutex::new(Instant::now()),
                finished: AtomicBool::new(false),
                destroyed: AtomicUsize::new(0),
            })
        }

        fn finish(&self) {
            self.finished.store(true, Ordering::SeqCst);
        }
    }

    impl Task for FakeTask {
        fn fingerprint(&self) -> &Fingerprint {
            &self.id
        }

        fn touch(&self) {
            *self.touched.lock() = Instant::now();
        }

        fn last_touched(&self) -> Instant {
            *self.touched.lock()
        }

        fn is_finished(&self) -> bool {
            self.finished.load(Ordering::SeqCst)
        }

        fn destroy(&self) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn get_or_register_coalesces() {
        let registry = TaskRegistry::default();
        let first = FakeTask::new("a");
        let dup = FakeTask::new("a");

        let got = registry.get_or_register(first.clone());
        assert!(Arc::ptr_eq(&got, &first));
        let got = registry.get_or_register(dup);
        assert!(Arc::ptr_eq(&got, &first));
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.get(first.fingerprint()).unwrap(), &first));
    }

    #[tokio::test]
    async fn concurrent_registration_yields_one_task() {
        let registry = Arc::new(TaskRegistry::<FakeTask>::default());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.get_or_register(FakeTask::new("same")) })
            })
            .collect();

        let mut winners = Vec::new();
        for h in handles {
            winners.push(h.await.unwrap());
        }
        assert!(winners.iter().all(|t| Arc::ptr_eq(t, &winners[0])));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn remove_with_and_without_destroy() {
        let registry = TaskRegistry::default();
        let a = FakeTask::new("a");
        let b = FakeTask::new("b");
        registry.get_or_register(a.clone());
        registry.get_or_register(b.clone());

        assert!(registry.remove(a.fingerprint(), true).is_some());
        assert_eq!(a.destroyed.load(Ordering::SeqCst), 1);
        assert!(registry.remove(b.fingerprint(), false).is_some());
        assert_eq!(b.destroyed.load(Ordering::SeqCst), 0);
        assert!(registry.remove(a.fingerprint(), true).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn finished_task_swept_after_ttl() {
        let registry = TaskRegistry::new(Duration::from_secs(600));
        let task = FakeTask::new("done");
        task.finish();
        registry.get_or_register(task.clone());

        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(registry.sweep_expired(true), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(registry.sweep_expired(true), 1);
        assert!(registry.is_empty());
        assert_eq!(task.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn running_task_never_swept() {
        let registry = TaskRegistry::new(Duration::from_secs(600));
        let task = FakeTask::new("running");
        registry.get_or_register(task.clone());

        tokio::time::advance(Duration::from_secs(100_000)).await;
        assert_eq!(registry.sweep_expired(true), 0);
        assert_eq!(registry.len(), 1);
        assert_eq!(task.destroyed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn touch_postpones_expiry() {
        let registry = TaskRegistry::new(Duration::from_secs(600));
        let task = FakeTask::new("touched");
        task.finish();
        registry.get_or_register(task.clone());

        tokio::time::advance(Duration::from_secs(500)).await;
        task.touch();
        tokio::time::advance(Duration::from_secs(500)).await;
        assert_eq!(registry.sweep_expired(true), 0);
        tokio::time::advance(Duration::from_secs(101)).await;
        assert_eq!(registry.sweep_expired(true), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_until_cancelled() {
        let registry = Arc::new(TaskRegistry::new(Duration::from_secs(10)));
        let task = FakeTask::new("background");
        task.finish();
        registry.get_or_register(task.clone());

        let cancel = CancellationToken::new();
        let handle = start_sweeper(registry.clone(), Duration::from_secs(5), cancel.clone());

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(registry.is_empty());
        assert_eq!(task.destroyed.load(Ordering::SeqCst), 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
