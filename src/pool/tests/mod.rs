//! Pool 单元测试
//!
//! 测试生命周期状态机、结果桥接以及 kill 与自然完成之间的竞争

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::args;
use crate::payload::Args;
use crate::pool::task::Registry;
use crate::pool::{Outcome, Pool, PoolError, PoolState, TaskHandle, TaskId, TaskSlot, TaskState};
use crate::runtime::{
    run_job, Completion, ExecutionHandle, Job, Runtime, RuntimeStats, ThreadRuntime,
    WorkerPoolRuntime,
};
use crate::scheduler::{EventLoop, Scheduler};

/// Runtime double whose jobs only run when the test says so.
#[derive(Default)]
struct ManualRuntime {
    pending: Mutex<VecDeque<(ExecutionHandle, Job, Completion)>>,
    stats: RuntimeStats,
    closed: AtomicBool,
    killed: AtomicBool,
}

impl ManualRuntime {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Run the oldest queued job on the current thread.
    fn finish_next(&self) -> bool {
        let next = self.pending.lock().pop_front();
        match next {
            Some((handle, job, on_complete)) => {
                run_job(&handle, job, on_complete, &self.stats);
                true
            }
            None => false,
        }
    }

    fn queued(&self) -> usize {
        self.pending.lock().len()
    }
}

impl fmt::Debug for ManualRuntime {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ManualRuntime")
            .field("queued", &self.queued())
            .finish()
    }
}

impl Runtime for ManualRuntime {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn execute(
        &self,
        task: TaskId,
        job: Job,
        on_complete: Completion,
    ) -> crate::pool::PoolResult<ExecutionHandle> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PoolError::ClosedPool);
        }
        let handle = ExecutionHandle::new(task);
        self.pending
            .lock()
            .push_back((handle.clone(), job, on_complete));
        self.stats.record_accepted();
        Ok(handle)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
        for (handle, _, _) in self.pending.lock().iter() {
            handle.destroy();
        }
    }

    fn stats(&self) -> &RuntimeStats {
        &self.stats
    }
}

/// The pool owns its runtime; tests keep a second handle to the same double.
impl Runtime for Arc<ManualRuntime> {
    fn name(&self) -> &'static str {
        ManualRuntime::name(self)
    }

    fn execute(
        &self,
        task: TaskId,
        job: Job,
        on_complete: Completion,
    ) -> crate::pool::PoolResult<ExecutionHandle> {
        ManualRuntime::execute(self, task, job, on_complete)
    }

    fn close(&self) {
        ManualRuntime::close(self)
    }

    fn kill(&self) {
        ManualRuntime::kill(self)
    }

    fn stats(&self) -> &RuntimeStats {
        ManualRuntime::stats(self)
    }
}

/// Runtime that can never start a context.
#[derive(Debug, Default)]
struct BrokenRuntime {
    stats: RuntimeStats,
}

impl Runtime for BrokenRuntime {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn execute(
        &self,
        _task: TaskId,
        _job: Job,
        _on_complete: Completion,
    ) -> crate::pool::PoolResult<ExecutionHandle> {
        Err(PoolError::Spawn("no threads left".to_string()))
    }

    fn close(&self) {}

    fn kill(&self) {}

    fn stats(&self) -> &RuntimeStats {
        &self.stats
    }
}

fn sum(args: Args) -> anyhow::Result<i64> {
    Ok(args.decode_all::<i64>()?.into_iter().sum())
}

fn manual_pool() -> (Pool, Arc<ManualRuntime>) {
    let runtime = ManualRuntime::new();
    (Pool::with_runtime(runtime.clone()), runtime)
}

#[cfg(test)]
mod pool_state_tests {
    use super::*;

    #[test]
    fn test_pool_state_display() {
        assert_eq!(PoolState::Open.to_string(), "open");
        assert_eq!(PoolState::Closed.to_string(), "closed");
        assert_eq!(PoolState::Killed.to_string(), "killed");
    }

    #[test]
    fn test_new_pool_is_open() {
        let pool = Pool::new();
        assert_eq!(pool.state(), PoolState::Open);
        assert!(pool.is_open());
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.runtime_name(), "thread");
    }

    #[test]
    fn test_from_config_picks_runtime() {
        use crate::util::config::{PoolConfig, RuntimeKind};

        let thread = Pool::from_config(&PoolConfig::default()).unwrap();
        assert_eq!(thread.runtime_name(), "thread");

        let config = PoolConfig {
            runtime: RuntimeKind::WorkerPool,
            workers: 2,
            ..PoolConfig::default()
        };
        let worker = Pool::from_config(&config).unwrap();
        assert_eq!(worker.runtime_name(), "worker-pool");
        assert!(worker.close());
    }

    #[test]
    fn test_pool_debug() {
        let (pool, _) = manual_pool();
        let debug = format!("{:?}", pool);
        assert!(debug.contains("Pool"));
        assert!(debug.contains("manual"));
    }
}

#[cfg(test)]
mod task_slot_tests {
    use super::*;
    use std::task::{Poll, Wake, Waker};

    struct NoopWake;

    impl Wake for NoopWake {
        fn wake(self: Arc<Self>) {}
    }

    fn noop_waker() -> Waker {
        Waker::from(Arc::new(NoopWake))
    }

    #[test]
    fn test_task_id_display() {
        assert_eq!(TaskId(3).to_string(), "Task(3)");
        assert_eq!(usize::from(TaskId::from(9)), 9);
    }

    #[test]
    fn test_complete_only_once() {
        let slot = TaskSlot::new(TaskId(0));
        assert_eq!(slot.state(), TaskState::Running);
        assert!(slot.complete(Outcome::Succeeded(1.into())));
        assert!(!slot.complete(Outcome::Succeeded(2.into())));

        let waker = noop_waker();
        assert_eq!(
            slot.poll_outcome(&waker),
            Poll::Ready(Some(Outcome::Succeeded(1.into())))
        );
        assert_eq!(slot.poll_outcome(&waker), Poll::Ready(None));
    }

    #[test]
    fn test_kill_overrides_unobserved_completion() {
        let slot = TaskSlot::new(TaskId(0));
        slot.complete(Outcome::Succeeded(123.into()));
        assert!(slot.kill());
        assert!(!slot.kill());

        let waker = noop_waker();
        assert_eq!(slot.poll_outcome(&waker), Poll::Ready(Some(Outcome::Killed)));
    }

    #[test]
    fn test_completion_after_kill_is_discarded() {
        let slot = TaskSlot::new(TaskId(0));
        assert!(slot.kill());
        assert!(!slot.complete(Outcome::Succeeded(123.into())));

        let waker = noop_waker();
        assert_eq!(slot.poll_outcome(&waker), Poll::Ready(Some(Outcome::Killed)));
    }

    #[test]
    fn test_kill_leaves_observed_outcome_alone() {
        let slot = TaskSlot::new(TaskId(0));
        slot.complete(Outcome::Succeeded(true.into()));

        let waker = noop_waker();
        assert!(slot.poll_outcome(&waker).is_ready());
        assert!(!slot.kill());
        assert_eq!(slot.state(), TaskState::Observed);
    }

    #[test]
    fn test_running_slot_stays_pending() {
        let slot = TaskSlot::new(TaskId(0));
        let waker = noop_waker();
        assert_eq!(slot.poll_outcome(&waker), Poll::Pending);
        assert_eq!(slot.state(), TaskState::Running);
    }
}

#[cfg(test)]
mod run_tests {
    use super::*;

    #[test]
    fn test_run_sum() {
        let event_loop = EventLoop::new().unwrap();
        let pool = Pool::new();

        let handle = pool.run(sum, args![1, 2, 3].unwrap()).unwrap();
        assert_eq!(event_loop.block_on(handle).unwrap(), 6);
        assert_eq!(pool.outstanding(), 0);
        assert!(pool.close());
    }

    #[test]
    fn test_nine_consecutive_runs() {
        let event_loop = EventLoop::new().unwrap();
        let pool = Pool::new();

        let handles: Vec<_> = (0..9)
            .map(|_| pool.run(sum, args![1, 2, 3].unwrap()).unwrap())
            .collect();
        assert_eq!(pool.outstanding(), 9);

        for handle in handles {
            assert_eq!(event_loop.block_on(handle).unwrap(), 6);
        }
        assert_eq!(pool.runtime_stats().completed(), 9);
    }

    #[test]
    fn test_task_ids_are_unique() {
        let (pool, _) = manual_pool();
        let a = pool.run(sum, Args::new()).unwrap();
        let b = pool.run(sum, Args::new()).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_application_error_propagates() {
        let event_loop = EventLoop::new().unwrap();
        let pool = Pool::new();

        let handle = pool
            .run(
                |_: Args| -> anyhow::Result<i64> { anyhow::bail!("ledger is locked") },
                Args::new(),
            )
            .unwrap();

        match event_loop.block_on(handle) {
            Err(PoolError::Application(err)) => {
                assert_eq!(err.message(), "ledger is locked");
                assert!(!err.is_panic());
            }
            other => panic!("expected application failure, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_argument_is_application_error() {
        let event_loop = EventLoop::new().unwrap();
        let pool = Pool::new();

        let handle = pool.run(sum, args!["six"].unwrap()).unwrap();
        assert!(event_loop.block_on(handle).unwrap_err().is_application());
    }

    #[test]
    fn test_panic_is_application_error() {
        let event_loop = EventLoop::new().unwrap();
        let pool = Pool::with_runtime(WorkerPoolRuntime::new().unwrap());

        let handle = pool
            .run(|_: Args| -> anyhow::Result<()> { panic!("worker exploded") }, Args::new())
            .unwrap();

        match event_loop.block_on(handle) {
            Err(PoolError::Application(err)) => {
                assert!(err.is_panic());
                assert_eq!(err.message(), "worker exploded");
            }
            other => panic!("expected panic failure, got {:?}", other),
        }

        // the worker that caught the panic keeps serving
        let handle = pool.run(sum, args![2, 2].unwrap()).unwrap();
        assert_eq!(event_loop.block_on(handle).unwrap(), 4);
    }

    #[test]
    fn test_result_type_mismatch_is_transport_error() {
        let event_loop = EventLoop::new().unwrap();

        let slot = Arc::new(TaskSlot::new(TaskId(0)));
        slot.complete(Outcome::Succeeded("not a number".into()));
        let handle: TaskHandle<i64> = TaskHandle::new(slot, Arc::new(Registry::default()));

        assert!(matches!(
            event_loop.block_on(handle),
            Err(PoolError::Transport(_))
        ));
    }

    #[test]
    fn test_runtime_rejection_rolls_back() {
        let pool = Pool::with_runtime(BrokenRuntime::default());
        let err = pool.run(sum, Args::new()).unwrap_err();
        assert!(matches!(err, PoolError::Spawn(_)));
        assert_eq!(pool.outstanding(), 0);
        assert!(pool.is_open());
    }

    #[test]
    fn test_runtime_refusal_on_open_pool_is_spawn_error() {
        let (pool, runtime) = manual_pool();
        runtime.close();

        let err = pool.run(sum, Args::new()).unwrap_err();
        assert!(matches!(err, PoolError::Spawn(_)), "got {:?}", err);
        assert!(pool.is_open());
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_dropped_handle_counts_until_job_finishes() {
        let (pool, runtime) = manual_pool();
        let handle = pool.run(sum, Args::new()).unwrap();
        assert_eq!(pool.outstanding(), 1);

        drop(handle);
        assert_eq!(pool.outstanding(), 1);

        // the job still runs; nobody is listening
        assert!(runtime.finish_next());
        assert_eq!(runtime.stats.completed(), 1);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_dropped_handle_of_finished_job_is_released() {
        let (pool, runtime) = manual_pool();
        let handle = pool.run(sum, Args::new()).unwrap();
        runtime.finish_next();
        assert_eq!(pool.outstanding(), 1);

        drop(handle);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_dropped_handle_on_thread_runtime() {
        let pool = Pool::new();
        let (release, gate) = crossbeam::channel::bounded::<()>(1);

        let handle = pool
            .run(
                move |_: Args| {
                    let _ = gate.recv();
                    Ok(true)
                },
                Args::new(),
            )
            .unwrap();
        drop(handle);
        assert_eq!(pool.outstanding(), 1);

        release.send(()).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while pool.outstanding() != 0 && std::time::Instant::now() < deadline {
            std::thread::yield_now();
        }
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_kill_settles_detached_task() {
        let (pool, runtime) = manual_pool();
        drop(pool.run(sum, Args::new()).unwrap());
        assert_eq!(pool.outstanding(), 1);

        pool.kill();
        assert_eq!(pool.outstanding(), 0);
        assert!(runtime.finish_next());
        assert_eq!(runtime.stats.discarded(), 1);
    }

    #[test]
    fn test_poll_after_observed() {
        let event_loop = EventLoop::new().unwrap();
        let (pool, runtime) = manual_pool();

        let mut handle = pool.run(sum, args![1].unwrap()).unwrap();
        runtime.finish_next();
        assert!(handle.is_finished());

        assert_eq!(event_loop.block_on(&mut handle).unwrap(), 1);
        assert!(matches!(
            event_loop.block_on(&mut handle),
            Err(PoolError::AlreadyObserved { .. })
        ));
    }
}

#[cfg(test)]
mod close_tests {
    use super::*;

    #[test]
    fn test_close_rejects_new_work_without_touching_runtime() {
        let (pool, runtime) = manual_pool();

        assert!(pool.close());
        assert_eq!(pool.state(), PoolState::Closed);
        assert!(runtime.closed.load(Ordering::SeqCst));

        let err = pool.run(sum, args![1, 2, 3].unwrap()).unwrap_err();
        assert!(err.is_closed());
        assert_eq!(runtime.stats.accepted(), 0);
        assert_eq!(runtime.queued(), 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (pool, _) = manual_pool();
        assert!(pool.close());
        assert!(pool.close());
        assert_eq!(pool.state(), PoolState::Closed);
    }

    #[test]
    fn test_close_drains_outstanding_work() {
        let event_loop = EventLoop::new().unwrap();
        let (pool, runtime) = manual_pool();

        let handle = pool.run(sum, args![1, 2, 3].unwrap()).unwrap();
        assert!(pool.close());
        assert_eq!(pool.outstanding(), 1);

        runtime.finish_next();
        assert_eq!(event_loop.block_on(handle).unwrap(), 6);
    }

    #[test]
    fn test_close_after_kill_keeps_killed() {
        let (pool, _) = manual_pool();
        pool.kill();
        assert!(pool.close());
        assert_eq!(pool.state(), PoolState::Killed);
    }

    #[test]
    fn test_drop_closes_open_pool() {
        let runtime = ManualRuntime::new();
        drop(Pool::with_runtime(runtime.clone()));
        assert!(runtime.closed.load(Ordering::SeqCst));
        assert!(!runtime.killed.load(Ordering::SeqCst));
    }
}

#[cfg(test)]
mod kill_tests {
    use super::*;

    #[test]
    fn test_kill_resolves_running_task() {
        let event_loop = EventLoop::new().unwrap();
        let (pool, runtime) = manual_pool();

        let handle = pool.run(sum, args![1, 2, 3].unwrap()).unwrap();
        let id = handle.id();
        pool.kill();

        assert_eq!(pool.state(), PoolState::Killed);
        assert_eq!(pool.outstanding(), 0);
        assert!(runtime.killed.load(Ordering::SeqCst));
        match event_loop.block_on(handle) {
            Err(PoolError::KilledRuntime { task }) => assert_eq!(task, id),
            other => panic!("expected killed runtime, got {:?}", other),
        }
    }

    #[test]
    fn test_kill_wins_over_unobserved_completion() {
        let event_loop = EventLoop::new().unwrap();
        let (pool, runtime) = manual_pool();

        let handle = pool.run(|_: Args| Ok(123), Args::new()).unwrap();
        runtime.finish_next();
        assert!(handle.is_finished());

        pool.kill();
        assert!(event_loop.block_on(handle).unwrap_err().is_killed());
    }

    #[test]
    fn test_kill_does_not_rewrite_observed_results() {
        let event_loop = EventLoop::new().unwrap();
        let (pool, runtime) = manual_pool();

        let handle = pool.run(sum, args![4, 5].unwrap()).unwrap();
        runtime.finish_next();
        let value = event_loop.block_on(handle).unwrap();

        pool.kill();
        assert_eq!(value, 9);
    }

    #[test]
    fn test_kill_destroys_contexts_of_queued_jobs() {
        let (pool, runtime) = manual_pool();
        let _first = pool.run(sum, Args::new()).unwrap();
        let _second = pool.run(sum, Args::new()).unwrap();

        pool.kill();

        assert!(runtime.finish_next());
        assert!(runtime.finish_next());
        assert_eq!(runtime.stats.completed(), 0);
        assert_eq!(runtime.stats.discarded(), 2);
    }

    #[test]
    fn test_kill_escalates_draining_close() {
        let event_loop = EventLoop::new().unwrap();
        let (pool, runtime) = manual_pool();

        let handle = pool.run(sum, args![1].unwrap()).unwrap();
        pool.close();
        pool.kill();
        assert_eq!(pool.state(), PoolState::Killed);

        runtime.finish_next();
        assert!(event_loop.block_on(handle).unwrap_err().is_killed());
    }

    #[test]
    fn test_kill_is_idempotent() {
        let (pool, runtime) = manual_pool();
        pool.kill();
        pool.kill();
        assert_eq!(pool.state(), PoolState::Killed);
        assert!(pool.run(sum, Args::new()).unwrap_err().is_closed());
        assert_eq!(runtime.stats.accepted(), 0);
        assert_eq!(runtime.queued(), 0);
    }

    #[test]
    fn test_deferred_kill_wins_against_sleeping_task() {
        let event_loop = EventLoop::new().unwrap();
        let pool = Arc::new(Pool::with_runtime(ThreadRuntime::new()));

        let killer = pool.clone();
        event_loop.defer(move || killer.kill());

        let result = event_loop.block_on(async {
            pool.run(
                |_: Args| {
                    std::thread::sleep(Duration::from_millis(300));
                    Ok(123)
                },
                Args::new(),
            )?
            .await
        });

        assert!(matches!(result, Err(PoolError::KilledRuntime { .. })));
    }
}
