//! Fixed set of worker threads fed through a channel.
//!
//! Every job still gets its own execution context (an [`ExecutionHandle`]);
//! the threads are only reused between jobs. Closing drops the sender so the
//! workers drain what is queued and exit. Killing additionally destroys every
//! queued and running context.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::{run_job, Completion, ExecutionHandle, Job, Runtime, RuntimeConfig, RuntimeStats};
use crate::pool::{PoolError, PoolResult, TaskId};

struct Envelope {
    handle: ExecutionHandle,
    job: Job,
    on_complete: Completion,
}

type LiveContexts = Arc<Mutex<HashMap<TaskId, ExecutionHandle>>>;

/// Runtime backed by a fixed number of worker threads.
#[derive(Debug)]
pub struct WorkerPoolRuntime {
    /// Configuration.
    config: RuntimeConfig,
    /// Job queue; `None` once closed or killed.
    sender: Mutex<Option<Sender<Envelope>>>,
    /// Worker threads.
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    /// Queued and running contexts.
    live: LiveContexts,
    /// Statistics.
    stats: Arc<RuntimeStats>,
}

impl WorkerPoolRuntime {
    /// Create a worker pool runtime with default config.
    pub fn new() -> PoolResult<Self> {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a worker pool runtime with custom configuration.
    pub fn with_config(mut config: RuntimeConfig) -> PoolResult<Self> {
        config.num_workers = config.num_workers.max(1);

        let (sender, receiver) = channel::unbounded();
        let live: LiveContexts = Arc::new(Mutex::new(HashMap::new()));
        let stats = Arc::new(RuntimeStats::default());

        // Dropping `sender` on error lets already spawned workers exit.
        let workers = Self::spawn_workers(&config, &receiver, &live, &stats)?;

        debug!(workers = workers.len(), "worker pool runtime started");

        Ok(Self {
            config,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            live,
            stats,
        })
    }

    /// Spawn worker threads.
    fn spawn_workers(
        config: &RuntimeConfig,
        receiver: &Receiver<Envelope>,
        live: &LiveContexts,
        stats: &Arc<RuntimeStats>,
    ) -> PoolResult<Vec<thread::JoinHandle<()>>> {
        let mut workers = Vec::with_capacity(config.num_workers);

        for worker_id in 0..config.num_workers {
            let receiver = receiver.clone();
            let live = live.clone();
            let stats = stats.clone();

            let worker = config
                .thread_builder(worker_id)
                .spawn(move || Self::worker_loop(worker_id, &receiver, &live, &stats))
                .map_err(|e| PoolError::Spawn(e.to_string()))?;

            workers.push(worker);
        }

        Ok(workers)
    }

    /// Worker thread main loop. Returns once the queue is closed and empty.
    fn worker_loop(
        worker_id: usize,
        receiver: &Receiver<Envelope>,
        live: &LiveContexts,
        stats: &RuntimeStats,
    ) {
        trace!(worker_id, "worker started");

        for envelope in receiver.iter() {
            let Envelope {
                handle,
                job,
                on_complete,
            } = envelope;
            run_job(&handle, job, on_complete, stats);
            live.lock().remove(&handle.task());
        }

        trace!(worker_id, "worker exiting");
    }

    /// Get the number of workers.
    #[inline]
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    /// Check if the runtime still accepts jobs.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Number of queued or running contexts.
    pub fn live_contexts(&self) -> usize {
        self.live.lock().len()
    }

    /// Wait for every worker to exit. Only returns after `close` or `kill`.
    pub fn join(&self) {
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

impl Runtime for WorkerPoolRuntime {
    fn name(&self) -> &'static str {
        "worker-pool"
    }

    fn execute(
        &self,
        task: TaskId,
        job: Job,
        on_complete: Completion,
    ) -> PoolResult<ExecutionHandle> {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(PoolError::ClosedPool)?;

        let handle = ExecutionHandle::new(task);
        self.live.lock().insert(task, handle.clone());

        let envelope = Envelope {
            handle: handle.clone(),
            job,
            on_complete,
        };
        if sender.send(envelope).is_err() {
            self.live.lock().remove(&task);
            return Err(PoolError::Spawn("worker queue disconnected".to_string()));
        }

        self.stats.record_accepted();
        trace!(%task, "job queued");
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
        if self.sender.lock().take().is_some() {
            debug!(pending = self.live_contexts(), "worker pool runtime closed");
        }
    }

    fn kill(&self) {
        self.sender.lock().take();
        let destroyed: Vec<ExecutionHandle> = self.live.lock().drain().map(|(_, h)| h).collect();
        for handle in &destroyed {
            handle.destroy();
        }
        debug!(destroyed = destroyed.len(), "worker pool runtime killed");
    }

    fn stats(&self) -> &RuntimeStats {
        &self.stats
    }
}

impl Drop for WorkerPoolRuntime {
    fn drop(&mut self) {
        self.close();
    }
}
