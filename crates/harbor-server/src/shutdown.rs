//! Shutdown signalling and in-flight work tracking.
//!
//! [`ShutdownSignal`] is a cloneable one-shot trigger that any number of
//! tasks can wait on. [`InFlightTracker`] counts outstanding work (open
//! connections and the accept loop itself) so a stopping server can wait
//! for it to drain.
//!
//! # Example
//!
//! ```rust,ignore
//! use harbor_server::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::with_os_signals();
//! shutdown.recv().await; // SIGTERM or SIGINT
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Notify};

/// A signal that can be used to trigger and await shutdown.
///
/// All clones share state: triggering any clone wakes every waiter, and
/// waiters that subscribe after the trigger complete immediately.
///
/// # Example
///
/// ```rust
/// use harbor_server::ShutdownSignal;
///
/// let shutdown = ShutdownSignal::new();
/// let observer = shutdown.clone();
///
/// shutdown.trigger();
/// assert!(observer.is_shutdown());
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    /// Creates a new, untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
            sender,
        }
    }

    /// Triggers the signal. Calling this more than once is harmless.
    pub fn trigger(&self) {
        if self
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            // No receivers is fine
            let _ = self.sender.send(());
        }
    }

    /// Returns `true` if the signal has been triggered.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Waits until the signal is triggered.
    ///
    /// Completes immediately if it already was.
    pub async fn recv(&self) {
        // Subscribe before checking the flag so a concurrent trigger
        // cannot slip between the two.
        let mut receiver = self.sender.subscribe();
        if self.is_shutdown() {
            return;
        }
        let _ = receiver.recv().await;
    }

    /// Creates a signal that is triggered by SIGTERM or SIGINT (Ctrl+C on
    /// non-Unix platforms).
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn with_os_signals() -> Self {
        let signal = Self::new();
        let trigger = signal.clone();

        tokio::spawn(async move {
            wait_for_os_signal().await;
            trigger.trigger();
        });

        signal
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_os_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %e, "Failed to register signal handlers, falling back to Ctrl+C");
            wait_for_ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_os_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(e) => {
            // Without any signal source the process only stops on an
            // explicit trigger.
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

/// Counts outstanding units of work.
///
/// Each unit holds an [`InFlightToken`]; dropping the last token wakes
/// anyone blocked in [`wait_idle`](Self::wait_idle).
///
/// # Example
///
/// ```rust
/// use harbor_server::InFlightTracker;
///
/// let tracker = InFlightTracker::new();
/// let token = tracker.acquire();
/// assert_eq!(tracker.in_flight(), 1);
///
/// drop(token);
/// assert_eq!(tracker.in_flight(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InFlightTracker {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl InFlightTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one unit of work. Hold the token for as long as the work
    /// runs.
    #[must_use]
    pub fn acquire(&self) -> InFlightToken {
        self.active.fetch_add(1, Ordering::SeqCst);
        InFlightToken {
            active: Arc::clone(&self.active),
            notify: Arc::clone(&self.notify),
        }
    }

    /// Returns the number of outstanding tokens.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Waits until no tokens are outstanding.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before the check so the final drop cannot
            // be missed.
            notified.as_mut().enable();

            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Token for one unit of in-flight work.
#[derive(Debug)]
pub struct InFlightToken {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl Drop for InFlightToken {
    fn drop(&mut self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }
}
