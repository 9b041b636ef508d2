//! Process lifecycle coordination.
//!
//! A [`ProcessLifecycle`] owns the process readiness flag and an ordered list
//! of [`Hook`]s, each an optional start half and an optional stop half.
//!
//! # Execution Order
//!
//! - **Start hooks**: run in registration order
//! - **Stop hooks**: run in reverse order, only for hooks that were reached
//!   by a successful start sequence, all sharing a single deadline
//!
//! If a start hook fails, the hooks that already started are stopped (in
//! reverse) before the original error is returned, so a partial start never
//! leaves resources open.
//!
//! # Example
//!
//! ```rust
//! use harbor_server::{Hook, LifecycleState, ProcessLifecycle};
//!
//! # tokio_test::block_on(async {
//! let lifecycle = ProcessLifecycle::new()
//!     .with_hook(
//!         Hook::new("database")
//!             .on_start(|| async { Ok(()) })
//!             .on_stop(|_ctx| async { Ok(()) }),
//!     );
//!
//! lifecycle.start().await.unwrap();
//! assert_eq!(lifecycle.state(), LifecycleState::Running);
//!
//! lifecycle.stop().await.unwrap();
//! assert_eq!(lifecycle.state(), LifecycleState::Stopped);
//! # });
//! ```

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;

use crate::handler::panic_message;
use crate::readiness::ReadinessFlag;
use crate::shutdown::ShutdownSignal;

/// Default deadline shared by all stop hooks.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(15);

/// Stand-in for a deadline too far away to represent (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Boxed error returned by hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for hooks.
pub type HookResult = Result<(), BoxError>;

type BoxedHookFuture = Pin<Box<dyn Future<Output = HookResult> + Send>>;
type StartFn = Arc<dyn Fn() -> BoxedHookFuture + Send + Sync>;
type StopFn = Arc<dyn Fn(StopContext) -> BoxedHookFuture + Send + Sync>;

/// Lifecycle states.
///
/// `Idle -> Starting -> Running -> Stopping -> Stopped`. A failed start goes
/// straight from `Starting` to `Stopped` after unwinding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, nothing started
    Idle,
    /// Start hooks are running
    Starting,
    /// All start hooks succeeded
    Running,
    /// Stop hooks are running
    Stopping,
    /// Terminal
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Error type for lifecycle operations.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// A start hook failed. `source` is the hook's own error, untouched.
    #[error("start hook '{hook}' failed: {source}")]
    StartFailed {
        /// Name of the failing hook
        hook: String,
        /// The hook's error
        #[source]
        source: BoxError,
    },

    /// One or more stop hooks failed. Every stop hook still ran.
    #[error("stop hooks failed: {failures}")]
    StopFailed {
        /// Each failure, in the order the hooks ran
        failures: HookFailures,
    },

    /// A stop hook did not finish before the shared deadline.
    #[error("stop hook '{hook}' exceeded the {timeout:?} shutdown deadline")]
    DeadlineExceeded {
        /// Name of the hook
        hook: String,
        /// The shared stop timeout
        timeout: Duration,
    },

    /// A hook panicked.
    #[error("hook '{hook}' panicked: {message}")]
    HookPanicked {
        /// Name of the hook
        hook: String,
        /// Panic payload, if it was a string
        message: String,
    },

    /// The operation is not valid in the current state.
    #[error("cannot {operation} lifecycle while {state}")]
    InvalidState {
        /// `"start"` or `"stop"`
        operation: &'static str,
        /// State at the time of the call
        state: LifecycleState,
    },
}

/// Result type for lifecycle operations.
pub type LifecycleResult<T = ()> = Result<T, LifecycleError>;

/// A single failed stop hook.
#[derive(Debug)]
pub struct HookFailure {
    /// Name of the hook
    pub hook: String,
    /// What went wrong
    pub error: BoxError,
}

impl fmt::Display for HookFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.hook, self.error)
    }
}

/// All stop-hook failures from one stop sequence.
#[derive(Debug, Default)]
pub struct HookFailures(Vec<HookFailure>);

impl HookFailures {
    /// Returns the number of failed hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no hook failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the failures in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &HookFailure> {
        self.0.iter()
    }

    /// Names of the failed hooks, in execution order.
    #[must_use]
    pub fn hooks(&self) -> Vec<&str> {
        self.0.iter().map(|failure| failure.hook.as_str()).collect()
    }
}

impl fmt::Display for HookFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

/// Context handed to stop hooks.
///
/// Every stop hook in one stop sequence sees the same deadline. Hooks that
/// wait on something should bound the wait by [`remaining`](Self::remaining);
/// a hook still running at the deadline is abandoned and reported as failed.
#[derive(Debug, Clone, Copy)]
pub struct StopContext {
    deadline: Instant,
}

impl StopContext {
    /// Creates a context with the given deadline.
    #[must_use]
    pub fn new(deadline: Instant) -> Self {
        Self { deadline }
    }

    /// Creates a context whose deadline is `timeout` from now.
    ///
    /// A timeout too large to add to the current instant is clamped to a
    /// far-future deadline.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        Self::new(deadline)
    }

    /// Returns the shared deadline.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Returns the time left before the deadline, or zero.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Returns `true` once the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// A named (start, stop) pair.
///
/// Either half may be omitted. A hook without a start half counts as
/// started as soon as the start sequence reaches it.
#[must_use]
pub struct Hook {
    name: String,
    on_start: Option<StartFn>,
    on_stop: Option<StopFn>,
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("name", &self.name)
            .field("on_start", &self.on_start.is_some())
            .field("on_stop", &self.on_stop.is_some())
            .finish()
    }
}

impl Hook {
    /// Creates an empty hook.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            on_start: None,
            on_stop: None,
        }
    }

    /// Sets the start half.
    pub fn on_start<F, Fut>(mut self, start: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.on_start = Some(Arc::new(move || Box::pin(start())));
        self
    }

    /// Sets the stop half.
    pub fn on_stop<F, Fut>(mut self, stop: F) -> Self
    where
        F: Fn(StopContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.on_stop = Some(Arc::new(move |ctx| Box::pin(stop(ctx))));
        self
    }

    /// Returns the hook name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug)]
struct Progress {
    state: LifecycleState,
    /// Hooks `[0, started)` have been started.
    started: usize,
}

/// The lifecycle coordinator for one process.
///
/// Constructed explicitly by the entry point. Nothing here is global, so
/// tests can run any number of independent instances.
#[must_use]
pub struct ProcessLifecycle {
    readiness: ReadinessFlag,
    hooks: Vec<Hook>,
    stop_timeout: Duration,
    progress: Mutex<Progress>,
}

impl Default for ProcessLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProcessLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessLifecycle")
            .field("hooks", &self.hooks.iter().map(Hook::name).collect::<Vec<_>>())
            .field("stop_timeout", &self.stop_timeout)
            .field("state", &self.state())
            .field("ready", &self.readiness.get())
            .finish()
    }
}

impl ProcessLifecycle {
    /// Creates an idle lifecycle with a fresh, lowered readiness flag.
    pub fn new() -> Self {
        Self::with_readiness(ReadinessFlag::new())
    }

    /// Creates an idle lifecycle around an existing readiness flag.
    pub fn with_readiness(readiness: ReadinessFlag) -> Self {
        Self {
            readiness,
            hooks: Vec::new(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            progress: Mutex::new(Progress {
                state: LifecycleState::Idle,
                started: 0,
            }),
        }
    }

    /// Sets the deadline shared by all stop hooks.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Appends a hook.
    pub fn with_hook(mut self, hook: Hook) -> Self {
        self.append(hook);
        self
    }

    /// Appends a hook.
    pub fn append(&mut self, hook: Hook) {
        self.hooks.push(hook);
    }

    /// Returns the process readiness flag.
    #[must_use]
    pub fn readiness(&self) -> &ReadinessFlag {
        &self.readiness
    }

    /// Returns the number of registered hooks.
    #[must_use]
    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// Returns the stop deadline.
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.progress.lock().state
    }

    /// Runs every start hook in registration order.
    ///
    /// On the first failure the already-started hooks are stopped in
    /// reverse, the lifecycle ends up [`Stopped`](LifecycleState::Stopped)
    /// and [`LifecycleError::StartFailed`] carries the hook's original
    /// error.
    pub async fn start(&self) -> LifecycleResult {
        {
            let mut progress = self.progress.lock();
            if progress.state != LifecycleState::Idle {
                return Err(LifecycleError::InvalidState {
                    operation: "start",
                    state: progress.state,
                });
            }
            progress.state = LifecycleState::Starting;
        }

        tracing::info!(hooks = self.hooks.len(), "Starting lifecycle");

        for (index, hook) in self.hooks.iter().enumerate() {
            if let Some(start) = &hook.on_start {
                tracing::debug!(hook = %hook.name, "Running start hook");

                if let Err(source) = guarded(&hook.name, || start()).await {
                    tracing::error!(
                        hook = %hook.name,
                        error = %source,
                        started = index,
                        "Start hook failed, stopping hooks that already started"
                    );
                    self.readiness.set(false);
                    let failures = self.run_stop_hooks(index).await;
                    if !failures.is_empty() {
                        tracing::error!(%failures, "Errors while unwinding a failed start");
                    }
                    self.progress.lock().state = LifecycleState::Stopped;

                    return Err(LifecycleError::StartFailed {
                        hook: hook.name.clone(),
                        source,
                    });
                }

                tracing::debug!(hook = %hook.name, "Start hook completed");
            }
            self.progress.lock().started = index + 1;
        }

        self.progress.lock().state = LifecycleState::Running;
        tracing::info!("Lifecycle running");
        Ok(())
    }

    /// Runs the stop hooks of every started hook in reverse order.
    ///
    /// Readiness is lowered before any hook runs. Every stop hook runs even
    /// if an earlier one fails; failures are returned together. Stopping an
    /// idle or already stopped lifecycle does nothing.
    pub async fn stop(&self) -> LifecycleResult {
        let started = {
            let mut progress = self.progress.lock();
            match progress.state {
                LifecycleState::Running => {
                    progress.state = LifecycleState::Stopping;
                    progress.started
                }
                LifecycleState::Idle | LifecycleState::Stopped => {
                    tracing::debug!(state = %progress.state, "Stop requested with nothing running");
                    return Ok(());
                }
                state @ (LifecycleState::Starting | LifecycleState::Stopping) => {
                    return Err(LifecycleError::InvalidState {
                        operation: "stop",
                        state,
                    });
                }
            }
        };

        self.readiness.set(false);
        tracing::info!(
            hooks = started,
            timeout = ?self.stop_timeout,
            "Stopping lifecycle"
        );

        let failures = self.run_stop_hooks(started).await;
        self.progress.lock().state = LifecycleState::Stopped;

        if failures.is_empty() {
            tracing::info!("Lifecycle stopped");
            Ok(())
        } else {
            tracing::error!(failed = failures.len(), "Lifecycle stopped with errors");
            Err(LifecycleError::StopFailed { failures })
        }
    }

    /// Starts, waits for `shutdown`, then stops.
    pub async fn run(&self, shutdown: ShutdownSignal) -> LifecycleResult {
        self.start().await?;
        shutdown.recv().await;
        tracing::info!("Shutdown requested");
        self.stop().await
    }

    async fn run_stop_hooks(&self, started: usize) -> HookFailures {
        let ctx = StopContext::after(self.stop_timeout);
        let mut failures = Vec::new();

        for hook in self.hooks[..started].iter().rev() {
            let Some(stop) = &hook.on_stop else {
                continue;
            };

            tracing::debug!(hook = %hook.name, "Running stop hook");
            let outcome =
                tokio::time::timeout_at(ctx.deadline(), guarded(&hook.name, || stop(ctx))).await;

            let error: BoxError = match outcome {
                Ok(Ok(())) => {
                    tracing::debug!(hook = %hook.name, "Stop hook completed");
                    continue;
                }
                Ok(Err(error)) => error,
                Err(_) => Box::new(LifecycleError::DeadlineExceeded {
                    hook: hook.name.clone(),
                    timeout: self.stop_timeout,
                }),
            };

            tracing::error!(hook = %hook.name, error = %error, "Stop hook failed");
            failures.push(HookFailure {
                hook: hook.name.clone(),
                error,
            });
        }

        HookFailures(failures)
    }
}

/// Calls a hook and awaits it, turning a panic in either step into an error.
async fn guarded<F>(hook: &str, call: F) -> HookResult
where
    F: FnOnce() -> BoxedHookFuture,
{
    let panicked = |payload: Box<dyn std::any::Any + Send>| -> BoxError {
        Box::new(LifecycleError::HookPanicked {
            hook: hook.to_string(),
            message: panic_message(payload.as_ref()),
        })
    };

    let future = match std::panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(future) => future,
        Err(payload) => return Err(panicked(payload)),
    };

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(panicked(payload)),
    }
}
