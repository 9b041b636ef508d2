//! The HTTP listener and its lifecycle.
//!
//! A [`ServerHandle`] binds a listener, raises the readiness flag, and runs a
//! detached accept loop that serves each connection with hyper on its own
//! task. Stopping lowers readiness first, stops accepting, and drains open
//! connections within a deadline before closing them forcibly.
//!
//! # Architecture
//!
//! - Accept loop: one tokio task per handle, watched by a supervisor that
//!   routes its death to the fatal handler
//! - Connections: one tokio task each, tracked by an [`InFlightTracker`]
//! - Requests: body collected, then handed to the [`RequestHandler`] with
//!   panics contained
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use harbor_server::{ReadinessFlag, ServerConfig, ServerHandle};
//!
//! let server = Arc::new(ServerHandle::new(config, handler, ReadinessFlag::new()));
//! let addr = server.start().await?;
//! // ...
//! server.stop(server.config().shutdown_timeout()).await?;
//! ```

use std::convert::Infallible;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{Request, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use harbor_telemetry::metrics::{record_request, InFlightGuard};

use crate::handler::{
    dispatch, error_response, panic_message, HttpResponse, MatchedRoute, SharedHandler,
    UNMATCHED_ROUTE,
};
use crate::lifecycle::{BoxError, Hook, StopContext};
use crate::readiness::ReadinessFlag;
use crate::shutdown::{InFlightToken, InFlightTracker, ShutdownSignal};

/// How long force-closed connections get to release their sockets.
const FORCE_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Back-off after the process runs out of file descriptors.
const RESOURCE_EXHAUSTED_BACKOFF: Duration = Duration::from_millis(50);

/// Called when the accept loop dies after startup.
pub type FatalHandler = Arc<dyn Fn(ServerError) + Send + Sync>;

enum HandleState {
    Idle,
    Starting,
    Running(RunningServer),
    Stopped,
}

struct RunningServer {
    local_addr: SocketAddr,
    graceful: ShutdownSignal,
    force: ShutdownSignal,
    tracker: InFlightTracker,
}

/// Everything a connection task needs.
struct Connections {
    handler: SharedHandler,
    header_read_timeout: Duration,
    request_timeout: Duration,
    graceful: ShutdownSignal,
    force: ShutdownSignal,
    tracker: InFlightTracker,
}

/// A bound HTTP listener with start and graceful stop.
///
/// A handle is started at most once. After [`stop`](Self::stop) it is
/// inert and a further [`start`](Self::start) fails.
pub struct ServerHandle {
    config: ServerConfig,
    handler: SharedHandler,
    readiness: ReadinessFlag,
    on_fatal: FatalHandler,
    state: Mutex<HandleState>,
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("config", &self.config)
            .field("local_addr", &self.local_addr())
            .field("ready", &self.readiness.get())
            .finish_non_exhaustive()
    }
}

impl ServerHandle {
    /// Creates an unstarted handle.
    ///
    /// The default fatal handler logs the fault and exits the process with
    /// status 1.
    #[must_use]
    pub fn new(config: ServerConfig, handler: SharedHandler, readiness: ReadinessFlag) -> Self {
        Self {
            config,
            handler,
            readiness,
            on_fatal: Arc::new(exit_process),
            state: Mutex::new(HandleState::Idle),
        }
    }

    /// Replaces the fatal handler.
    #[must_use]
    pub fn with_fatal_handler<F>(mut self, on_fatal: F) -> Self
    where
        F: Fn(ServerError) + Send + Sync + 'static,
    {
        self.on_fatal = Arc::new(on_fatal);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the readiness flag this handle drives.
    #[must_use]
    pub fn readiness(&self) -> &ReadinessFlag {
        &self.readiness
    }

    /// Returns the bound address while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock() {
            HandleState::Running(running) => Some(running.local_addr),
            _ => None,
        }
    }

    /// Returns `true` between a successful start and the beginning of stop.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), HandleState::Running(_))
    }

    /// Returns the number of open connections plus the accept loop, while
    /// running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        match &*self.state.lock() {
            HandleState::Running(running) => running.tracker.in_flight(),
            _ => 0,
        }
    }

    /// Binds the listener, raises readiness and spawns the accept loop.
    ///
    /// Readiness is raised only after the bind succeeded. Returns the bound
    /// address, which differs from the configured one for port `0`.
    pub async fn start(&self) -> ServerResult<SocketAddr> {
        {
            let mut state = self.state.lock();
            if !matches!(*state, HandleState::Idle) {
                return Err(ServerError::AlreadyStarted);
            }
            *state = HandleState::Starting;
        }

        let addr = self.config.bind_addr();
        let mut bound = bind(&addr).await;
        if bound.is_err() {
            if let Some(fallback) = self.config.fallback_bind_addr() {
                tracing::debug!(addr = %addr, %fallback, "IPv6 wildcard unavailable, binding IPv4");
                if let Ok(listener) = bind(&fallback).await {
                    bound = Ok(listener);
                }
            }
        }
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                *self.state.lock() = HandleState::Stopped;
                tracing::error!(addr = %addr, error = %source, "Failed to bind listener");
                return Err(ServerError::Bind { addr, source });
            }
        };

        let mut state = self.state.lock();
        if !matches!(*state, HandleState::Starting) {
            return Err(ServerError::StoppedDuringStartup);
        }

        // Listen before ready
        self.readiness.set(true);

        let graceful = ShutdownSignal::new();
        let force = ShutdownSignal::new();
        let tracker = InFlightTracker::new();

        let connections = Arc::new(Connections {
            handler: Arc::clone(&self.handler),
            header_read_timeout: self.config.header_read_timeout(),
            request_timeout: self.config.request_timeout(),
            graceful: graceful.clone(),
            force: force.clone(),
            tracker: tracker.clone(),
        });

        let accept = tokio::spawn(accept_loop(tracker.acquire(), listener, connections));
        tokio::spawn(supervise(accept, Arc::clone(&self.on_fatal)));

        *state = HandleState::Running(RunningServer {
            local_addr,
            graceful,
            force,
            tracker,
        });

        tracing::info!(addr = %local_addr, "Server listening");
        Ok(local_addr)
    }

    /// Lowers readiness, stops accepting and drains open connections.
    ///
    /// Returns [`ServerError::ShutdownTimeout`] if connections are still
    /// open after `timeout`; they are closed forcibly before returning.
    /// Stopping an unstarted or already stopped handle does nothing.
    pub async fn stop(&self, timeout: Duration) -> ServerResult<()> {
        let previous = std::mem::replace(&mut *self.state.lock(), HandleState::Stopped);
        self.readiness.set(false);

        let running = match previous {
            HandleState::Running(running) => running,
            HandleState::Starting => {
                tracing::debug!("Stop requested while binding, startup will be abandoned");
                return Ok(());
            }
            HandleState::Idle | HandleState::Stopped => return Ok(()),
        };

        tracing::info!(
            addr = %running.local_addr,
            in_flight = running.tracker.in_flight(),
            timeout = ?timeout,
            "Draining connections"
        );
        running.graceful.trigger();

        if tokio::time::timeout(timeout, running.tracker.wait_idle())
            .await
            .is_ok()
        {
            tracing::info!(addr = %running.local_addr, "Server stopped");
            return Ok(());
        }

        let in_flight = running.tracker.in_flight();
        tracing::warn!(
            addr = %running.local_addr,
            in_flight,
            "Drain deadline reached, closing remaining connections"
        );
        running.force.trigger();
        if tokio::time::timeout(FORCE_CLOSE_GRACE, running.tracker.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!(
                in_flight = running.tracker.in_flight(),
                "Connections still open after forced close"
            );
        }

        Err(ServerError::ShutdownTimeout { timeout, in_flight })
    }

    /// Wraps this handle as a lifecycle hook named `http-server`.
    ///
    /// The stop half drains for the configured shutdown timeout, capped by
    /// what is left of the lifecycle's stop deadline minus the forced-close
    /// grace, so a drain overrun is still reported as
    /// [`ServerError::ShutdownTimeout`].
    pub fn lifecycle_hook(self: &Arc<Self>) -> Hook {
        let starter = Arc::clone(self);
        let stopper = Arc::clone(self);

        Hook::new("http-server")
            .on_start(move || {
                let server = Arc::clone(&starter);
                async move { server.start().await.map(|_| ()).map_err(BoxError::from) }
            })
            .on_stop(move |ctx: StopContext| {
                let server = Arc::clone(&stopper);
                async move {
                    // Leave room for the forced close inside the shared deadline
                    let budget = ctx.remaining().saturating_sub(FORCE_CLOSE_GRACE);
                    let timeout = server.config.shutdown_timeout().min(budget);
                    server.stop(timeout).await.map_err(BoxError::from)
                }
            })
    }
}

async fn bind(addr: &str) -> io::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    Ok((listener, local_addr))
}

fn exit_process(error: ServerError) {
    tracing::error!(error = %error, "Fatal server error, exiting");
    std::process::exit(1);
}

/// Awaits the accept loop and reports its death.
async fn supervise(accept: JoinHandle<ServerResult<()>>, on_fatal: FatalHandler) {
    let error = match accept.await {
        Ok(Ok(())) => return,
        Ok(Err(error)) => error,
        Err(join_error) if join_error.is_panic() => {
            ServerError::AcceptLoopPanicked(panic_message(join_error.into_panic().as_ref()))
        }
        // Cancelled by runtime shutdown
        Err(_) => return,
    };

    tracing::error!(error = %error, "Accept loop terminated");
    on_fatal(error);
}

// Parameters drop in reverse order, so the listener is closed before the
// token is released.
async fn accept_loop(
    _token: InFlightToken,
    listener: TcpListener,
    connections: Arc<Connections>,
) -> ServerResult<()> {
    loop {
        tokio::select! {
            biased;

            _ = connections.graceful.recv() => {
                tracing::debug!("Accept loop stopping");
                return Ok(());
            }

            result = listener.accept() => match result {
                Ok((stream, remote_addr)) => {
                    let token = connections.tracker.acquire();
                    let connections = Arc::clone(&connections);
                    tokio::spawn(async move {
                        serve_connection(&connections, stream, remote_addr).await;
                        drop(token);
                    });
                }
                Err(e) if is_transient(&e) => {
                    tracing::warn!(error = %e, "Transient accept error");
                }
                Err(e) if is_resource_exhausted(&e) => {
                    tracing::warn!(error = %e, "Out of file descriptors, backing off");
                    tokio::time::sleep(RESOURCE_EXHAUSTED_BACKOFF).await;
                }
                Err(e) => return Err(ServerError::Accept(e)),
            }
        }
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

fn is_resource_exhausted(error: &io::Error) -> bool {
    // ENFILE, EMFILE
    matches!(error.raw_os_error(), Some(23 | 24))
}

async fn serve_connection(
    connections: &Arc<Connections>,
    stream: TcpStream,
    remote_addr: SocketAddr,
) {
    let io = TokioIo::new(stream);
    let service_connections = Arc::clone(connections);
    let service = service_fn(move |req: Request<Incoming>| {
        let connections = Arc::clone(&service_connections);
        async move { Ok::<_, Infallible>(connections.handle_request(req).await) }
    });

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(connections.header_read_timeout);
    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = connections.graceful.recv() => {
            conn.as_mut().graceful_shutdown();
            tokio::select! {
                result = conn.as_mut() => result,
                _ = connections.force.recv() => {
                    tracing::debug!(remote_addr = %remote_addr, "Connection closed forcibly");
                    return;
                }
            }
        }
    };

    if let Err(e) = result {
        tracing::debug!(remote_addr = %remote_addr, error = %e, "Connection error");
    }
}

impl Connections {
    async fn handle_request(&self, req: Request<Incoming>) -> HttpResponse {
        let started = Instant::now();
        let in_flight = InFlightGuard::new();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let response = self.collect_and_dispatch(req).await;

        let route = response
            .extensions()
            .get::<MatchedRoute>()
            .map_or(UNMATCHED_ROUTE, |matched| matched.0);
        record_request(
            method.as_str(),
            route,
            response.status().as_u16(),
            started.elapsed(),
        );
        drop(in_flight);

        tracing::info!(
            http.method = %method,
            http.path = %path,
            http.status = response.status().as_u16(),
            latency_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Request completed"
        );
        response
    }

    async fn collect_and_dispatch(&self, req: Request<Incoming>) -> HttpResponse {
        let (parts, body) = req.into_parts();

        let body = match tokio::time::timeout(self.request_timeout, body.collect()).await {
            Ok(Ok(collected)) => collected.to_bytes(),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to read request body");
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "BODY_READ_ERROR",
                    &format!("Failed to read request body: {e}"),
                );
            }
            Err(_) => {
                tracing::warn!("Request body collection timed out");
                return error_response(
                    StatusCode::REQUEST_TIMEOUT,
                    "REQUEST_TIMEOUT",
                    "Request body collection timed out",
                );
            }
        };

        let request = Request::from_parts(parts, body);
        let handled = dispatch(self.handler.as_ref(), request);
        match tokio::time::timeout(self.request_timeout, handled).await {
            Ok(response) => response,
            Err(_) => {
                tracing::warn!("Handler execution timed out");
                error_response(
                    StatusCode::GATEWAY_TIMEOUT,
                    "HANDLER_TIMEOUT",
                    "Handler execution timed out",
                )
            }
        }
    }
}
