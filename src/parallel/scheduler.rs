//! Bounded worker pool with a FIFO queue

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::ResolvedSettings;
use crate::error::{CompressError, Result};
use crate::parallel::progress::{ProgressState, ProgressTracker};
use crate::parallel::worker::Executor;
use crate::processing::CompressionResult;

/// Called once per finished task with `(current, total, result)`.
///
/// Calls are serialized and arrive in completion order; `current` is
/// strictly increasing.
pub type ProgressCallback = Arc<dyn Fn(usize, usize, &CompressionResult) + Send + Sync>;

/// One unit of work: compress `input_path` into `output_path`
#[derive(Debug, Clone)]
pub struct CompressionTask {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Owned snapshot; never shared with another task
    pub settings: ResolvedSettings,
}

impl CompressionTask {
    pub fn new(input_path: PathBuf, output_path: PathBuf, settings: ResolvedSettings) -> Self {
        Self {
            input_path,
            output_path,
            settings,
        }
    }
}

/// Resolves to the result of one submitted task
pub struct TaskHandle {
    input_path: PathBuf,
    receiver: oneshot::Receiver<CompressionResult>,
}

impl TaskHandle {
    pub fn input_path(&self) -> &PathBuf {
        &self.input_path
    }

    /// Wait for the task's result
    pub async fn result(self) -> CompressionResult {
        match self.receiver.await {
            Ok(result) => result,
            // The slot was dropped without a value: the runtime went away mid-task
            Err(_) => CompressionResult::failed(self.input_path, "task was abandoned before completion"),
        }
    }
}

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum concurrent execution units
    pub max_workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: crate::config::default_worker_count(),
        }
    }
}

struct QueuedTask {
    task: CompressionTask,
    slot: oneshot::Sender<CompressionResult>,
}

struct ProgressReport {
    current: usize,
    total: usize,
    result: CompressionResult,
}

#[derive(Default)]
struct PoolState {
    pending: VecDeque<QueuedTask>,
    active: usize,
    peak_active: usize,
    total: usize,
    completed: usize,
    results: Vec<CompressionResult>,
    /// Completed but not yet reported to the callback
    reports: VecDeque<ProgressReport>,
    /// A completion is currently draining `reports`
    reporting: bool,
}

impl PoolState {
    fn outstanding(&self) -> usize {
        self.pending.len() + self.active + self.reports.len() + usize::from(self.reporting)
    }
}

struct PoolInner {
    max_workers: usize,
    executor: Executor,
    runtime: Handle,
    state: Mutex<PoolState>,
    on_progress: Mutex<Option<ProgressCallback>>,
    outstanding: watch::Sender<usize>,
    tracker: ProgressTracker,
}

/// Runs compression tasks with at most `max_workers` in flight.
///
/// Dispatch happens on submit and on every completion; nothing polls.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create a pool on the current Tokio runtime
    pub fn new(config: PoolConfig, executor: Executor) -> Result<Self> {
        if config.max_workers == 0 {
            return Err(CompressError::config("Worker count must be greater than 0"));
        }
        let runtime = Handle::try_current()
            .map_err(|e| CompressError::system(format!("Worker pool needs a Tokio runtime: {}", e)))?;

        debug!("Initializing worker pool with {} workers", config.max_workers);

        let (outstanding, _) = watch::channel(0);
        Ok(Self {
            inner: Arc::new(PoolInner {
                max_workers: config.max_workers,
                executor,
                runtime,
                state: Mutex::new(PoolState::default()),
                on_progress: Mutex::new(None),
                outstanding,
                tracker: ProgressTracker::new(),
            }),
        })
    }

    /// Install the progress callback
    pub fn set_progress_callback(&self, callback: ProgressCallback) {
        *self.inner.on_progress.lock().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    /// Queue one task and start it if a slot is free
    pub fn submit(&self, task: CompressionTask) -> TaskHandle {
        self.submit_all(vec![task]).remove(0)
    }

    /// Queue a batch under one lock, so `total` is final before anything completes
    pub fn submit_all(&self, tasks: Vec<CompressionTask>) -> Vec<TaskHandle> {
        let mut handles = Vec::with_capacity(tasks.len());
        {
            let mut state = self.inner.lock_state();
            for task in tasks {
                let (slot, receiver) = oneshot::channel();
                handles.push(TaskHandle {
                    input_path: task.input_path.clone(),
                    receiver,
                });
                state.pending.push_back(QueuedTask { task, slot });
            }
            state.total += handles.len();
            self.inner.tracker.add_files(handles.len());
            self.inner.publish(&state);
        }

        debug!("Queued {} tasks", handles.len());
        PoolInner::dispatch(&self.inner);
        handles
    }

    /// Wait until nothing is queued, running or being reported.
    ///
    /// Returns every result so far, in completion order.
    pub async fn wait_for_all(&self) -> Vec<CompressionResult> {
        let mut outstanding = self.inner.outstanding.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = outstanding.wait_for(|count| *count == 0).await;
        self.inner.lock_state().results.clone()
    }

    pub fn max_workers(&self) -> usize {
        self.inner.max_workers
    }

    /// Tasks currently running
    pub fn active_count(&self) -> usize {
        self.inner.lock_state().active
    }

    /// Tasks waiting for a slot
    pub fn pending_count(&self) -> usize {
        self.inner.lock_state().pending.len()
    }

    /// Highest number of tasks that ever ran at once
    pub fn peak_active(&self) -> usize {
        self.inner.lock_state().peak_active
    }

    /// Counters, throughput and ETA
    pub fn progress(&self) -> ProgressState {
        self.inner.tracker.get_state()
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.inner.tracker
    }
}

impl PoolInner {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        // A panicking callback never holds this lock, but stay usable regardless
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, state: &PoolState) {
        self.outstanding.send_replace(state.outstanding());
    }

    /// Start queued tasks while slots are free
    fn dispatch(inner: &Arc<Self>) {
        let mut launch = Vec::new();
        {
            let mut state = inner.lock_state();
            while state.active < inner.max_workers {
                let Some(queued) = state.pending.pop_front() else {
                    break;
                };
                state.active += 1;
                state.peak_active = state.peak_active.max(state.active);
                launch.push(queued);
            }
            inner.publish(&state);
        }

        for QueuedTask { task, slot } in launch {
            let pool = Arc::clone(inner);
            debug!("Dispatching {:?}", task.input_path);
            inner.runtime.spawn(async move {
                let result = pool.executor.run(task).await;
                PoolInner::complete(&pool, slot, result);
            });
        }
    }

    fn complete(inner: &Arc<Self>, slot: oneshot::Sender<CompressionResult>, result: CompressionResult) {
        inner.tracker.record(&result);
        let should_drain = {
            let mut state = inner.lock_state();
            state.active -= 1;
            state.completed += 1;
            let report = ProgressReport {
                current: state.completed,
                total: state.total,
                result: result.clone(),
            };
            state.results.push(result.clone());
            state.reports.push_back(report);

            let should_drain = !state.reporting;
            state.reporting = true;
            inner.publish(&state);
            should_drain
        };

        // Receiver may be gone if the caller only waits on the pool
        let _ = slot.send(result);

        Self::dispatch(inner);

        if should_drain {
            inner.drain_reports();
        }
    }

    /// Deliver queued progress reports one at a time, without holding the state lock
    fn drain_reports(&self) {
        loop {
            let report = {
                let mut state = self.lock_state();
                match state.reports.pop_front() {
                    Some(report) => report,
                    None => {
                        state.reporting = false;
                        self.publish(&state);
                        if state.outstanding() == 0 && state.total > 0 {
                            info!("All {} tasks finished", state.total);
                        }
                        return;
                    }
                }
            };

            let callback = self.on_progress.lock().unwrap_or_else(|e| e.into_inner()).clone();
            if let Some(callback) = callback {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    callback(report.current, report.total, &report.result)
                }));
                if outcome.is_err() {
                    warn!("Progress callback panicked at {}/{}", report.current, report.total);
                }
            }
        }
    }
}
