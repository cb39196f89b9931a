//! Task definitions for the pool.
//!
//! A task is one in-flight `run` call. Its outcome lives in a shared
//! [`TaskSlot`] that the runtime's completion callback, the pool's `kill`
//! and the caller's [`TaskHandle`] all touch. The slot settles to exactly one
//! terminal [`Outcome`] as far as the caller can tell.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tracing::trace;

use super::error::{ApplicationError, PoolError, PoolResult};
use crate::payload::Value;
use crate::runtime::{ExecutionHandle, JobResult};

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub usize);

impl TaskId {
    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> usize {
        self.0
    }
}

impl From<usize> for TaskId {
    fn from(val: usize) -> Self {
        Self(val)
    }
}

impl From<TaskId> for usize {
    fn from(val: TaskId) -> Self {
        val.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Hands out task IDs; shared by every `run` on one pool.
#[derive(Debug, Default)]
pub struct TaskIdGenerator {
    next_id: AtomicUsize,
}

impl TaskIdGenerator {
    /// Create a new task ID generator.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate the next task ID.
    #[inline]
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Terminal outcome of a task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The callable returned a value.
    Succeeded(Value),
    /// The callable returned an error or panicked.
    Failed(ApplicationError),
    /// The execution context was destroyed by `kill`.
    Killed,
}

impl From<JobResult> for Outcome {
    fn from(result: JobResult) -> Self {
        match result {
            Ok(value) => Outcome::Succeeded(value),
            Err(err) => Outcome::Failed(err),
        }
    }
}

/// Observable task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// The runtime has not reported back yet.
    Running,
    /// An outcome is waiting to be observed.
    Settled,
    /// The caller has taken the outcome.
    Observed,
}

#[derive(Debug)]
enum SlotState {
    Running,
    Settled(Outcome),
    Observed,
}

#[derive(Debug)]
struct SlotInner {
    state: SlotState,
    waker: Option<Waker>,
}

/// Shared result cell of one task.
#[derive(Debug)]
pub struct TaskSlot {
    id: TaskId,
    inner: Mutex<SlotInner>,
}

impl TaskSlot {
    /// Create a running slot.
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            inner: Mutex::new(SlotInner {
                state: SlotState::Running,
                waker: None,
            }),
        }
    }

    /// Get the task ID.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Get the current state.
    pub fn state(&self) -> TaskState {
        match self.inner.lock().state {
            SlotState::Running => TaskState::Running,
            SlotState::Settled(_) => TaskState::Settled,
            SlotState::Observed => TaskState::Observed,
        }
    }

    /// Record a natural completion. Ignored unless the task is still running.
    pub fn complete(
        &self,
        outcome: Outcome,
    ) -> bool {
        let waker = {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, SlotState::Running) {
                trace!(task = %self.id, "late completion discarded");
                return false;
            }
            inner.state = SlotState::Settled(outcome);
            inner.waker.take()
        };

        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Force the `Killed` outcome.
    ///
    /// Overrides a natural completion that has not been observed yet; an
    /// observed outcome is left alone.
    pub fn kill(&self) -> bool {
        let waker = {
            let mut inner = self.inner.lock();
            match inner.state {
                SlotState::Observed | SlotState::Settled(Outcome::Killed) => return false,
                SlotState::Running | SlotState::Settled(_) => {
                    inner.state = SlotState::Settled(Outcome::Killed);
                    inner.waker.take()
                }
            }
        };

        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Take the outcome if one is available, registering `waker` otherwise.
    ///
    /// Yields `Ready(None)` when the outcome was already taken.
    pub fn poll_outcome(
        &self,
        waker: &Waker,
    ) -> Poll<Option<Outcome>> {
        let mut inner = self.inner.lock();
        match std::mem::replace(&mut inner.state, SlotState::Observed) {
            SlotState::Settled(outcome) => Poll::Ready(Some(outcome)),
            SlotState::Observed => Poll::Ready(None),
            SlotState::Running => {
                inner.state = SlotState::Running;
                match &inner.waker {
                    Some(existing) if existing.will_wake(waker) => {}
                    _ => inner.waker = Some(waker.clone()),
                }
                Poll::Pending
            }
        }
    }
}

/// Registry entry for a task that is still executing or not yet observed.
#[derive(Debug)]
pub(crate) struct TaskEntry {
    pub(crate) slot: Arc<TaskSlot>,
    pub(crate) execution: Option<ExecutionHandle>,
    /// The handle was dropped while the job was running.
    pub(crate) detached: bool,
}

/// Outstanding tasks of one pool.
///
/// Lock order: the registry lock may be held while taking a slot lock,
/// never the reverse.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
}

impl Registry {
    pub(crate) fn insert(
        &self,
        slot: Arc<TaskSlot>,
    ) {
        self.tasks.lock().insert(
            slot.id(),
            TaskEntry {
                slot,
                execution: None,
                detached: false,
            },
        );
    }

    /// Remember the execution context backing a registered task.
    pub(crate) fn attach(
        &self,
        id: TaskId,
        execution: ExecutionHandle,
    ) {
        if let Some(entry) = self.tasks.lock().get_mut(&id) {
            entry.execution = Some(execution);
        }
    }

    pub(crate) fn remove(
        &self,
        id: TaskId,
    ) -> Option<TaskEntry> {
        self.tasks.lock().remove(&id)
    }

    /// Forget the caller of `id`.
    ///
    /// A task that is still running stays registered until its completion
    /// arrives (see [`Registry::release_detached`]) or the pool is killed.
    pub(crate) fn detach(
        &self,
        id: TaskId,
    ) {
        let mut tasks = self.tasks.lock();
        let running = match tasks.get(&id) {
            Some(entry) => entry.slot.state() == TaskState::Running,
            None => return,
        };

        if running {
            if let Some(entry) = tasks.get_mut(&id) {
                entry.detached = true;
            }
        } else {
            tasks.remove(&id);
        }
    }

    /// Drop the entry of a completed task whose handle is gone.
    pub(crate) fn release_detached(
        &self,
        id: TaskId,
    ) {
        let mut tasks = self.tasks.lock();
        if tasks.get(&id).is_some_and(|entry| entry.detached) {
            tasks.remove(&id);
            trace!(task = %id, "detached task released");
        }
    }

    pub(crate) fn drain(&self) -> Vec<TaskEntry> {
        self.tasks.lock().drain().map(|(_, entry)| entry).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.lock().len()
    }
}

/// Caller-side handle of a submitted task.
///
/// Resolves to the decoded result, a [`PoolError::Application`] failure or
/// [`PoolError::KilledRuntime`]. Dropping the handle discards the result; the
/// pool keeps counting the task until its job finishes.
#[must_use = "a task handle does nothing unless awaited"]
pub struct TaskHandle<R> {
    slot: Arc<TaskSlot>,
    registry: Arc<Registry>,
    _result: PhantomData<fn() -> R>,
}

impl<R> TaskHandle<R> {
    pub(crate) fn new(
        slot: Arc<TaskSlot>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            slot,
            registry,
            _result: PhantomData,
        }
    }

    /// Get the task ID.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.slot.id()
    }

    /// Get the current task state.
    #[inline]
    pub fn state(&self) -> TaskState {
        self.slot.state()
    }

    /// Whether an outcome is ready to be observed.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.state() != TaskState::Running
    }
}

impl<R> fmt::Debug for TaskHandle<R> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

impl<R: DeserializeOwned> Future for TaskHandle<R> {
    type Output = PoolResult<R>;

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        let this = self.get_mut();
        let id = this.slot.id();

        let outcome = match this.slot.poll_outcome(cx.waker()) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(None) => return Poll::Ready(Err(PoolError::AlreadyObserved { task: id })),
            Poll::Ready(Some(outcome)) => outcome,
        };

        this.registry.remove(id);
        trace!(task = %id, "outcome observed");

        Poll::Ready(match outcome {
            Outcome::Succeeded(value) => serde_json::from_value(value).map_err(PoolError::from),
            Outcome::Failed(err) => Err(PoolError::Application(err)),
            Outcome::Killed => Err(PoolError::KilledRuntime { task: id }),
        })
    }
}

impl<R> Drop for TaskHandle<R> {
    fn drop(&mut self) {
        self.registry.detach(self.slot.id());
    }
}
