//! One OS thread per job.
//!
//! Threads cannot be stopped from outside, so destroying a context detaches
//! its thread and suppresses the completion; whatever the job returns is
//! dropped on the floor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{run_job, Completion, ExecutionHandle, Job, Runtime, RuntimeConfig, RuntimeStats};
use crate::pool::{PoolError, PoolResult, TaskId};

/// Runtime that spawns a dedicated thread for every job.
#[derive(Debug)]
pub struct ThreadRuntime {
    config: RuntimeConfig,
    /// Contexts whose job has not returned yet.
    live: Arc<Mutex<HashMap<TaskId, ExecutionHandle>>>,
    accepting: AtomicBool,
    spawned: AtomicUsize,
    stats: Arc<RuntimeStats>,
}

impl ThreadRuntime {
    /// Create a thread runtime with default config.
    #[inline]
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a thread runtime with custom configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            config,
            live: Arc::new(Mutex::new(HashMap::new())),
            accepting: AtomicBool::new(true),
            spawned: AtomicUsize::new(0),
            stats: Arc::new(RuntimeStats::default()),
        }
    }

    /// Number of contexts whose job is still running.
    pub fn live_contexts(&self) -> usize {
        self.live.lock().len()
    }
}

impl Default for ThreadRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime for ThreadRuntime {
    fn name(&self) -> &'static str {
        "thread"
    }

    fn execute(
        &self,
        task: TaskId,
        job: Job,
        on_complete: Completion,
    ) -> PoolResult<ExecutionHandle> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(PoolError::ClosedPool);
        }

        let handle = ExecutionHandle::new(task);
        self.live.lock().insert(task, handle.clone());

        let index = self.spawned.fetch_add(1, Ordering::Relaxed);
        let live = self.live.clone();
        let stats = self.stats.clone();
        let context = handle.clone();

        let spawned = self.config.thread_builder(index).spawn(move || {
            run_job(&context, job, on_complete, &stats);
            live.lock().remove(&context.task());
        });

        if let Err(e) = spawned {
            self.live.lock().remove(&task);
            return Err(PoolError::Spawn(e.to_string()));
        }

        self.stats.record_accepted();
        trace!(%task, index, "spawned execution thread");
        Ok(handle)
    }

    fn destroy(
        &self,
        handle: &ExecutionHandle,
    ) {
        if handle.destroy() {
            self.live.lock().remove(&handle.task());
        }
    }

    fn close(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            debug!(running = self.live_contexts(), "thread runtime closed");
        }
    }

    fn kill(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let destroyed: Vec<ExecutionHandle> = self.live.lock().drain().map(|(_, h)| h).collect();
        for handle in &destroyed {
            handle.destroy();
        }
        debug!(destroyed = destroyed.len(), "thread runtime killed");
    }

    fn stats(&self) -> &RuntimeStats {
        &self.stats
    }
}
