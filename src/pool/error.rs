//! Pool error types

use std::any::Any;

use thiserror::Error;

use super::task::TaskId;

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// A failure raised by a callable inside its execution context.
///
/// Only the rendered message crosses the isolation boundary; the original
/// error value stays behind in the worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ApplicationError {
    message: String,
    panicked: bool,
}

impl ApplicationError {
    /// Create an application error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            panicked: false,
        }
    }

    /// Build an error from a panic payload caught inside a worker.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "task panicked".to_string()
        };

        Self {
            message,
            panicked: true,
        }
    }

    /// The error message as rendered inside the execution context.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the callable panicked rather than returning an error.
    #[inline]
    pub fn is_panic(&self) -> bool {
        self.panicked
    }
}

impl From<anyhow::Error> for ApplicationError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{:#}", err))
    }
}

/// Errors surfaced to callers of [`Pool`](super::Pool).
#[derive(Debug, Error)]
pub enum PoolError {
    /// `run` was called on a pool that is closed or killed
    #[error("Pool is closed and does not accept new work")]
    ClosedPool,

    /// The callable failed inside its execution context
    #[error("Task failed: {0}")]
    Application(#[from] ApplicationError),

    /// The execution context backing the task was destroyed by `kill`
    #[error("{task} was killed before its result was observed")]
    KilledRuntime {
        /// The task that lost its execution context
        task: TaskId,
    },

    /// A value could not cross the isolation boundary
    #[error("Payload transport error: {0}")]
    Transport(String),

    /// The runtime could not create an execution context
    #[error("Failed to spawn execution context: {0}")]
    Spawn(String),

    /// The task handle was polled again after yielding its outcome
    #[error("{task} outcome was already observed")]
    AlreadyObserved {
        /// The task whose outcome was taken
        task: TaskId,
    },
}

impl PoolError {
    /// `true` for [`PoolError::ClosedPool`].
    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, PoolError::ClosedPool)
    }

    /// `true` for [`PoolError::KilledRuntime`].
    #[inline]
    pub fn is_killed(&self) -> bool {
        matches!(self, PoolError::KilledRuntime { .. })
    }

    /// `true` for [`PoolError::Application`].
    #[inline]
    pub fn is_application(&self) -> bool {
        matches!(self, PoolError::Application(_))
    }
}

impl From<serde_json::Error> for PoolError {
    fn from(e: serde_json::Error) -> Self {
        PoolError::Transport(e.to_string())
    }
}

impl From<std::io::Error> for PoolError {
    fn from(e: std::io::Error) -> Self {
        PoolError::Spawn(e.to_string())
    }
}
