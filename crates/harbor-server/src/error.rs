//! Server error types.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by a [`ServerHandle`](crate::ServerHandle).
#[derive(Error, Debug)]
pub enum ServerError {
    /// The listener could not be bound. Fatal at startup, never retried.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// `start` was called on a handle that is running or already stopped.
    #[error("server handle has already been started or stopped")]
    AlreadyStarted,

    /// `stop` was requested while the handle was still binding.
    #[error("server was stopped before startup completed")]
    StoppedDuringStartup,

    /// Draining did not finish in time; remaining connections were closed
    /// forcibly.
    #[error("graceful shutdown timed out after {timeout:?} with {in_flight} task(s) still in flight")]
    ShutdownTimeout {
        /// The drain deadline that elapsed
        timeout: Duration,
        /// Connections (and the accept loop, if still running) left over
        in_flight: usize,
    },

    /// The accept loop hit a non-transient error.
    #[error("accept loop failed: {0}")]
    Accept(#[source] std::io::Error),

    /// The accept loop panicked.
    #[error("accept loop panicked: {0}")]
    AcceptLoopPanicked(String),
}

impl ServerError {
    /// Returns `true` for the drain-timeout error.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ShutdownTimeout { .. })
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
