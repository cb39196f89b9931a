//! Task pool
//!
//! [`Pool`] accepts callables with their arguments, hands each one to its
//! [`Runtime`] and returns a [`TaskHandle`] the caller awaits for the result.
//!
//! # Lifecycle
//!
//! ```text
//! Open --close()--> Closed --kill()--> Killed
//!   \_______________kill()______________/
//! ```
//!
//! `close` is draining: work already submitted finishes and delivers its real
//! result. `kill` is abortive: every task the caller has not observed yet
//! resolves to [`PoolError::KilledRuntime`], even if its natural result has
//! already arrived. Both refuse new work with [`PoolError::ClosedPool`].

pub mod error;
pub mod task;

pub use error::{ApplicationError, PoolError, PoolResult};
pub use task::{Outcome, TaskHandle, TaskId, TaskIdGenerator, TaskSlot, TaskState};

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace};

use crate::payload::Args;
use crate::runtime::{Completion, Job, JobResult, Runtime, RuntimeStats, ThreadRuntime, WorkerPoolRuntime};
use crate::util::config::{PoolConfig, RuntimeKind};
use task::Registry;

/// Pool lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting work.
    Open,
    /// Draining; no new work accepted.
    Closed,
    /// Torn down; outstanding work resolved as killed.
    Killed,
}

impl fmt::Display for PoolState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            PoolState::Open => "open",
            PoolState::Closed => "closed",
            PoolState::Killed => "killed",
        };
        f.write_str(name)
    }
}

/// Concurrent task-execution pool.
pub struct Pool {
    /// Lifecycle state; also serializes submission against `kill`.
    state: Mutex<PoolState>,
    /// Tasks whose outcome has not been observed.
    registry: Arc<Registry>,
    /// Runtime owned exclusively by this pool.
    runtime: Box<dyn Runtime>,
    /// Task ID generator.
    ids: TaskIdGenerator,
}

impl Pool {
    /// Create a pool that spawns one thread per task.
    #[inline]
    pub fn new() -> Self {
        Self::with_runtime(ThreadRuntime::new())
    }

    /// Create a pool that owns `runtime`.
    ///
    /// Only the pool closes or kills its runtime, so every outstanding task
    /// is settled by the pool itself.
    pub fn with_runtime<R: Runtime + 'static>(runtime: R) -> Self {
        debug!(runtime = runtime.name(), "pool created");
        Self {
            state: Mutex::new(PoolState::Open),
            registry: Arc::new(Registry::default()),
            runtime: Box::new(runtime),
            ids: TaskIdGenerator::new(),
        }
    }

    /// Create a pool with the runtime described by `config`.
    pub fn from_config(config: &PoolConfig) -> PoolResult<Self> {
        let runtime_config = config.runtime_config();
        let pool = match config.runtime {
            RuntimeKind::Thread => Self::with_runtime(ThreadRuntime::with_config(runtime_config)),
            RuntimeKind::WorkerPool => {
                Self::with_runtime(WorkerPoolRuntime::with_config(runtime_config)?)
            }
        };
        Ok(pool)
    }

    /// Submit `func(args)` for execution in its own context.
    ///
    /// Fails immediately with [`PoolError::ClosedPool`] unless the pool is
    /// open; the runtime is not touched in that case.
    pub fn run<F, R>(
        &self,
        func: F,
        args: Args,
    ) -> PoolResult<TaskHandle<R>>
    where
        F: FnOnce(Args) -> anyhow::Result<R> + Send + 'static,
        R: Serialize + DeserializeOwned,
    {
        let state = self.state.lock();
        if *state != PoolState::Open {
            debug!(state = %*state, "rejecting run on a pool that is not open");
            return Err(PoolError::ClosedPool);
        }

        let id = self.ids.next();
        let slot = Arc::new(TaskSlot::new(id));
        self.registry.insert(slot.clone());

        let job: Job = Box::new(move || -> JobResult {
            let value = func(args)?;
            serde_json::to_value(value)
                .map_err(|e| ApplicationError::new(format!("failed to encode result: {}", e)))
        });
        let completed = slot.clone();
        let registry = self.registry.clone();
        let on_complete: Completion = Box::new(move |result| {
            if completed.complete(Outcome::from(result)) {
                registry.release_detached(completed.id());
            }
        });

        match self.runtime.execute(id, job, on_complete) {
            Ok(execution) => self.registry.attach(id, execution),
            Err(err) => {
                self.registry.remove(id);
                debug!(task = %id, error = %err, "runtime rejected task");
                // still Open: a refusal is a runtime failure, not ClosedPool
                let err = match err {
                    PoolError::ClosedPool => PoolError::Spawn(format!(
                        "{} runtime refused {}",
                        self.runtime.name(),
                        id
                    )),
                    other => other,
                };
                return Err(err);
            }
        }
        drop(state);

        trace!(task = %id, "task submitted");
        Ok(TaskHandle::new(slot, self.registry.clone()))
    }

    /// Request orderly shutdown.
    ///
    /// Outstanding tasks keep running and deliver their results. Always
    /// returns `true`; repeated calls, or a call after `kill`, change nothing.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        if *state == PoolState::Open {
            *state = PoolState::Closed;
            drop(state);

            debug!(outstanding = self.outstanding(), "pool closed, draining");
            self.runtime.close();
        }
        true
    }

    /// Tear the pool down immediately.
    ///
    /// Every task the caller has not observed yet resolves to
    /// [`PoolError::KilledRuntime`] and its execution context is destroyed.
    pub fn kill(&self) {
        let mut state = self.state.lock();
        if *state == PoolState::Killed {
            return;
        }
        let previous = *state;
        *state = PoolState::Killed;

        let entries = self.registry.drain();
        let mut killed = 0;
        for entry in &entries {
            if entry.slot.kill() {
                killed += 1;
            }
            if let Some(execution) = &entry.execution {
                self.runtime.destroy(execution);
            }
        }
        drop(state);

        self.runtime.kill();
        debug!(%previous, killed, "pool killed");
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> PoolState {
        *self.state.lock()
    }

    /// Check if the pool accepts work.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.state() == PoolState::Open
    }

    /// Number of submitted tasks whose outcome has not been observed.
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.registry.len()
    }

    /// Name of the backing runtime.
    #[inline]
    pub fn runtime_name(&self) -> &'static str {
        self.runtime.name()
    }

    /// Statistics of the backing runtime.
    #[inline]
    pub fn runtime_stats(&self) -> &RuntimeStats {
        self.runtime.stats()
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Pool {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Pool")
            .field("state", &self.state())
            .field("outstanding", &self.outstanding())
            .field("runtime", &self.runtime.name())
            .finish()
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if self.is_open() {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests;
