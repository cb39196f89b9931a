//! parallel-pool
//!
//! A concurrent task-execution pool. Callables run in execution contexts
//! outside the caller's thread; results come back through futures so a
//! single-threaded event loop is never blocked.
//!
//! # Example
//!
//! ```no_run
//! use parallel_pool::{args, EventLoop, Pool, PoolError, Scheduler};
//!
//! fn main() -> anyhow::Result<()> {
//!     let event_loop = EventLoop::new()?;
//!     let pool = Pool::new();
//!
//!     let handle = pool.run(
//!         |args| Ok(args.decode_all::<i64>()?.into_iter().sum::<i64>()),
//!         args![1, 2, 3]?,
//!     )?;
//!     assert_eq!(event_loop.block_on(handle)?, 6);
//!
//!     pool.close();
//!     assert!(matches!(pool.run(|_| Ok(0), args![]?), Err(PoolError::ClosedPool)));
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/parallel-pool")]
#![warn(rust_2018_idioms)]

pub mod payload;
pub mod pool;
pub mod runtime;
pub mod scheduler;

// Utility modules
pub mod util;

// Re-exports
pub use payload::{Args, Value};
pub use pool::{
    ApplicationError, Outcome, Pool, PoolError, PoolResult, PoolState, TaskHandle, TaskId,
    TaskState,
};
pub use runtime::{
    Completion, ExecutionHandle, Job, JobResult, Runtime, RuntimeConfig, RuntimeStats,
    ThreadRuntime, WorkerPoolRuntime,
};
pub use scheduler::{EventLoop, Scheduler};
pub use util::config::{PoolConfig, RuntimeKind};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "parallel-pool";
