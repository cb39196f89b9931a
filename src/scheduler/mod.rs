//! Cooperative scheduler
//!
//! The pool never blocks its caller; callers drive task handles from a
//! single-threaded loop. [`EventLoop`] is that loop: a tokio current-thread
//! runtime with a [`LocalSet`] so deferred callbacks need not be `Send`.
//!
//! ```
//! use parallel_pool::{args, EventLoop, Pool, Scheduler};
//!
//! let event_loop = EventLoop::new().unwrap();
//! let pool = Pool::new();
//! let sum = event_loop.block_on(async {
//!     pool.run(|args| Ok(args.decode_all::<i64>()?.iter().sum::<i64>()), args![1, 2, 3]?)?
//!         .await
//! });
//! assert_eq!(sum.unwrap(), 6);
//! ```

use std::future::Future;
use std::io;

use tokio::runtime::{Builder, Runtime as TokioRuntime};
use tokio::task::LocalSet;

/// Capability of a single-threaded cooperative loop.
pub trait Scheduler {
    /// Run `callback` on a later iteration of the loop.
    fn defer<F>(
        &self,
        callback: F,
    ) where
        F: FnOnce() + 'static;

    /// Drive the loop until `future` settles.
    ///
    /// Deferred callbacks keep running while the future is pending.
    fn block_on<F: Future>(
        &self,
        future: F,
    ) -> F::Output;
}

/// Event loop built on a tokio current-thread runtime.
#[derive(Debug)]
pub struct EventLoop {
    runtime: TokioRuntime,
    local: LocalSet,
}

impl EventLoop {
    /// Create a new event loop.
    pub fn new() -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            runtime,
            local: LocalSet::new(),
        })
    }
}

impl Scheduler for EventLoop {
    fn defer<F>(
        &self,
        callback: F,
    ) where
        F: FnOnce() + 'static,
    {
        self.local.spawn_local(async move {
            callback();
        });
    }

    fn block_on<F: Future>(
        &self,
        future: F,
    ) -> F::Output {
        self.local.block_on(&self.runtime, future)
    }
}
