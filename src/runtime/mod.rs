//! Execution runtimes
//!
//! A [`Runtime`] runs jobs in execution contexts outside the caller's thread
//! of control and reports each job's result through a completion callback.
//! The pool only depends on this trait; [`ThreadRuntime`] and
//! [`WorkerPoolRuntime`] are the two implementations shipped here.

pub mod thread;
pub mod worker;

pub use thread::ThreadRuntime;
pub use worker::WorkerPoolRuntime;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread as std_thread;

use crate::payload::Value;
use crate::pool::{ApplicationError, PoolResult, TaskId};

/// What a job produces inside its execution context.
pub type JobResult = Result<Value, ApplicationError>;

/// A unit of work: the callable with its arguments already bound.
pub type Job = Box<dyn FnOnce() -> JobResult + Send + 'static>;

/// Invoked at most once with the job's result.
pub type Completion = Box<dyn FnOnce(JobResult) + Send + 'static>;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of worker threads (worker-pool runtime only).
    pub num_workers: usize,
    /// Prefix for the names of spawned threads.
    pub thread_name_prefix: String,
    /// Stack size of spawned threads; platform default when `None`.
    pub stack_size: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let num_cpus = std_thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            num_workers: num_cpus,
            thread_name_prefix: "pool-worker".to_string(),
            stack_size: None,
        }
    }
}

impl RuntimeConfig {
    /// Thread builder for the `index`-th thread of this runtime.
    pub(crate) fn thread_builder(
        &self,
        index: usize,
    ) -> std_thread::Builder {
        let builder =
            std_thread::Builder::new().name(format!("{}-{}", self.thread_name_prefix, index));
        match self.stack_size {
            Some(size) => builder.stack_size(size),
            None => builder,
        }
    }
}

/// Handle to one execution context.
///
/// Destroying the handle guarantees its completion never fires afterwards.
#[derive(Debug, Clone)]
pub struct ExecutionHandle {
    task: TaskId,
    destroyed: Arc<AtomicBool>,
}

impl ExecutionHandle {
    /// Create a live handle for `task`.
    pub fn new(task: TaskId) -> Self {
        Self {
            task,
            destroyed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The task this context runs.
    #[inline]
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// Whether the context was destroyed.
    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Mark the context destroyed. Returns `false` if it already was.
    #[inline]
    pub fn destroy(&self) -> bool {
        !self.destroyed.swap(true, Ordering::SeqCst)
    }
}

/// Runtime statistics.
#[derive(Debug, Default)]
pub struct RuntimeStats {
    /// Jobs accepted by `execute`.
    pub jobs_accepted: AtomicUsize,
    /// Jobs whose execution started.
    pub jobs_started: AtomicUsize,
    /// Jobs whose completion was delivered.
    pub jobs_completed: AtomicUsize,
    /// Jobs skipped or whose result was dropped because their context was destroyed.
    pub jobs_discarded: AtomicUsize,
}

impl RuntimeStats {
    #[inline]
    pub fn record_accepted(&self) {
        self.jobs_accepted.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn record_started(&self) {
        self.jobs_started.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn record_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn record_discarded(&self) {
        self.jobs_discarded.fetch_add(1, Ordering::SeqCst);
    }

    /// Snapshot of `jobs_accepted`.
    pub fn accepted(&self) -> usize {
        self.jobs_accepted.load(Ordering::SeqCst)
    }

    /// Snapshot of `jobs_completed`.
    pub fn completed(&self) -> usize {
        self.jobs_completed.load(Ordering::SeqCst)
    }

    /// Snapshot of `jobs_discarded`.
    pub fn discarded(&self) -> usize {
        self.jobs_discarded.load(Ordering::SeqCst)
    }
}

/// Capability to run jobs in isolated execution contexts.
pub trait Runtime: Send + Sync + fmt::Debug {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Start `job` in its own execution context.
    ///
    /// `on_complete` receives the job's result unless the returned handle is
    /// destroyed first.
    fn execute(
        &self,
        task: TaskId,
        job: Job,
        on_complete: Completion,
    ) -> PoolResult<ExecutionHandle>;

    /// Forcibly tear down one execution context.
    fn destroy(
        &self,
        handle: &ExecutionHandle,
    ) {
        handle.destroy();
    }

    /// Stop accepting jobs and let accepted ones finish.
    fn close(&self);

    /// Destroy every execution context; pending completions never fire.
    fn kill(&self);

    /// Runtime statistics.
    fn stats(&self) -> &RuntimeStats;
}

/// Run `job` on the current thread unless `handle` was destroyed, then
/// deliver the result unless it was destroyed meanwhile.
pub(crate) fn run_job(
    handle: &ExecutionHandle,
    job: Job,
    on_complete: Completion,
    stats: &RuntimeStats,
) {
    if handle.is_destroyed() {
        stats.record_discarded();
        return;
    }

    stats.record_started();
    let result = panic::catch_unwind(AssertUnwindSafe(job))
        .unwrap_or_else(|payload| Err(ApplicationError::from_panic(payload)));

    if handle.is_destroyed() {
        tracing::trace!(task = %handle.task(), "context destroyed, result dropped");
        stats.record_discarded();
        return;
    }

    stats.record_completed();
    on_complete(result);
}
