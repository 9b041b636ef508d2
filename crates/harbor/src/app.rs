//! Explicit wiring of the service.
//!
//! No container and no globals: the entry point builds an [`App`] from a
//! loaded configuration and drives its lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use harbor_config::HarborConfig;
use harbor_server::{
    HealthCheck, Hook, LifecycleResult, ProcessLifecycle, ReadinessFlag, ServerHandle,
    SharedHandler, ShutdownSignal,
};
use harbor_telemetry::MetricsRegistry;

use crate::routes::DemoRouter;

/// The assembled service: one HTTP server hook on a process lifecycle.
#[derive(Debug)]
pub struct App {
    lifecycle: ProcessLifecycle,
    server: Arc<ServerHandle>,
}

impl App {
    /// Wires the demo router behind the HTTP server.
    #[must_use]
    pub fn new(config: &HarborConfig, metrics: MetricsRegistry) -> Self {
        let readiness = ReadinessFlag::new();
        let health = HealthCheck::new(config.telemetry.service_name.clone(), crate::VERSION);
        let router = DemoRouter::new(readiness.clone(), health, metrics);

        Self::with_handler(config, readiness, Arc::new(router))
    }

    /// Wires an arbitrary handler behind the HTTP server.
    ///
    /// `readiness` is raised by the server once it listens and lowered
    /// when stopping begins.
    #[must_use]
    pub fn with_handler(
        config: &HarborConfig,
        readiness: ReadinessFlag,
        handler: SharedHandler,
    ) -> Self {
        let server = Arc::new(ServerHandle::new(
            config.server_config(),
            handler,
            readiness.clone(),
        ));

        let lifecycle = ProcessLifecycle::with_readiness(readiness)
            .with_stop_timeout(config.stop_timeout())
            .with_hook(server.lifecycle_hook());

        Self { lifecycle, server }
    }

    /// Appends a hook after the HTTP server, so it starts after the
    /// listener and stops before it.
    #[must_use]
    pub fn with_hook(mut self, hook: Hook) -> Self {
        self.lifecycle.append(hook);
        self
    }

    /// Returns the process readiness flag.
    #[must_use]
    pub fn readiness(&self) -> &ReadinessFlag {
        self.lifecycle.readiness()
    }

    /// Returns the bound address while the server is running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    /// Returns the lifecycle.
    #[must_use]
    pub fn lifecycle(&self) -> &ProcessLifecycle {
        &self.lifecycle
    }

    /// Runs all start hooks.
    pub async fn start(&self) -> LifecycleResult {
        self.lifecycle.start().await
    }

    /// Runs all stop hooks.
    pub async fn stop(&self) -> LifecycleResult {
        self.lifecycle.stop().await
    }

    /// Starts, waits for `shutdown`, then stops.
    pub async fn run(&self, shutdown: ShutdownSignal) -> LifecycleResult {
        self.lifecycle.run(shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_server::LifecycleState;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn local_config() -> HarborConfig {
        let mut config = HarborConfig::default();
        config.server.http_addr = "127.0.0.1:0".to_string();
        config
    }

    #[test]
    fn test_wiring() {
        let app = App::new(&local_config(), MetricsRegistry::detached());

        assert_eq!(app.lifecycle().hook_count(), 1);
        assert_eq!(app.lifecycle().stop_timeout(), local_config().stop_timeout());
        assert!(!app.readiness().get());
        assert!(app.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_start_stop() {
        let app = App::new(&local_config(), MetricsRegistry::detached());

        app.start().await.unwrap();
        assert!(app.readiness().get());
        assert!(app.local_addr().is_some());

        app.stop().await.unwrap();
        assert!(!app.readiness().get());
        assert_eq!(app.lifecycle().state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_extra_hook_stops_before_server() {
        let app = App::new(&local_config(), MetricsRegistry::detached());
        let server_running = Arc::new(AtomicBool::new(false));
        let observed = Arc::clone(&server_running);
        let server = Arc::clone(&app.server);

        let app = app.with_hook(Hook::new("observer").on_stop(move |_ctx| {
            observed.store(server.is_running(), Ordering::SeqCst);
            async { Ok(()) }
        }));

        app.start().await.unwrap();
        app.stop().await.unwrap();
        assert!(server_running.load(Ordering::SeqCst));
    }
}
