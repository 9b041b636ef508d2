//! Process readiness flag.
//!
//! Readiness answers "should this process receive new traffic right now?".
//! It is distinct from liveness, which only asks whether the process is
//! alive. The flag starts out `false`, is raised by the server start hook
//! once the listener is bound, and is lowered as the very first step of
//! shutdown so that orchestrator probes begin failing before the socket
//! closes.
//!
//! # Example
//!
//! ```rust
//! use harbor_server::ReadinessFlag;
//!
//! let readiness = ReadinessFlag::new();
//! assert!(!readiness.get());
//!
//! // Clones observe the same flag
//! let probe_view = readiness.clone();
//! readiness.set(true);
//! assert!(probe_view.get());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shared, lock-free readiness flag.
///
/// Cloning is cheap and every clone refers to the same underlying atomic,
/// so the request handler and the lifecycle hooks can each hold their own
/// handle without any locking.
#[derive(Debug, Clone, Default)]
pub struct ReadinessFlag {
    ready: Arc<AtomicBool>,
}

impl ReadinessFlag {
    /// Creates a new flag in the not-ready state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the readiness state.
    ///
    /// Release ordering pairs with the acquire load in [`get`](Self::get):
    /// a reader that observes `true` also observes everything the writer
    /// did before raising the flag (binding the listener).
    pub fn set(&self, ready: bool) {
        let previous = self.ready.swap(ready, Ordering::AcqRel);
        if previous != ready {
            tracing::debug!(ready, "Readiness changed");
        }
    }

    /// Returns the current readiness state.
    #[must_use]
    pub fn get(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_not_ready() {
        let readiness = ReadinessFlag::new();
        assert!(!readiness.get());
        assert!(!ReadinessFlag::default().get());
    }

    #[test]
    fn test_set_and_get() {
        let readiness = ReadinessFlag::new();

        readiness.set(true);
        assert!(readiness.get());

        readiness.set(false);
        assert!(!readiness.get());
    }

    #[test]
    fn test_set_is_idempotent() {
        let readiness = ReadinessFlag::new();
        readiness.set(true);
        readiness.set(true);
        assert!(readiness.get());
    }

    #[test]
    fn test_clones_share_state() {
        let writer = ReadinessFlag::new();
        let reader = writer.clone();

        writer.set(true);
        assert!(reader.get());

        reader.set(false);
        assert!(!writer.get());
    }

    #[test]
    fn test_independent_flags_do_not_interfere() {
        let a = ReadinessFlag::new();
        let b = ReadinessFlag::new();

        a.set(true);
        assert!(a.get());
        assert!(!b.get());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_readers_see_whole_values() {
        let readiness = ReadinessFlag::new();

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let readiness = readiness.clone();
                tokio::spawn(async move {
                    let mut seen_true = 0usize;
                    let mut seen_false = 0usize;
                    for _ in 0..10_000 {
                        if readiness.get() {
                            seen_true += 1;
                        } else {
                            seen_false += 1;
                        }
                        tokio::task::yield_now().await;
                    }
                    seen_true + seen_false
                })
            })
            .collect();

        for i in 0..10_000 {
            readiness.set(i % 2 == 0);
        }

        for reader in readers {
            assert_eq!(reader.await.unwrap(), 10_000);
        }
    }
}
