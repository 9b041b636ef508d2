//! End-to-end lifecycle tests against a real listener.
//!
//! Each test binds `127.0.0.1:0` and talks to the service over HTTP/1.1.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::Notify;

use harbor::{App, DemoRouter};
use harbor_config::HarborConfig;
use harbor_server::handler::json_response;
use harbor_server::{
    HealthCheck, HttpRequest, LifecycleError, LifecycleState, ReadinessFlag, RequestHandler,
};
use harbor_telemetry::MetricsRegistry;

fn local_config() -> HarborConfig {
    let mut config = HarborConfig::default();
    config.server.http_addr = "127.0.0.1:0".to_string();
    config
}

async fn get(addr: SocketAddr, path: &str) -> Result<(StatusCode, Bytes), hyper::Error> {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(conn);

    let request = Request::builder()
        .method(Method::GET)
        .uri(path)
        .header(http::header::HOST, "localhost")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = sender.send_request(request).await?;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes();
    Ok((status, body))
}

/// Serves the demo routes plus `/slow`, which blocks until released.
struct SlowApp {
    app: Arc<App>,
    readiness: ReadinessFlag,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

fn slow_app(config: &HarborConfig) -> SlowApp {
    let readiness = ReadinessFlag::new();
    let router = Arc::new(DemoRouter::new(
        readiness.clone(),
        HealthCheck::new("harbor-e2e", harbor::VERSION),
        MetricsRegistry::detached(),
    ));
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());

    let handler = {
        let entered = Arc::clone(&entered);
        let release = Arc::clone(&release);
        move |request: HttpRequest| {
            let router = Arc::clone(&router);
            let entered = Arc::clone(&entered);
            let release = Arc::clone(&release);
            async move {
                if request.uri().path() == "/slow" {
                    entered.notify_one();
                    release.notified().await;
                    return json_response(StatusCode::OK, &serde_json::json!({ "slow": true }));
                }
                router.handle(request).await
            }
        }
    };

    let app = App::with_handler(config, readiness.clone(), Arc::new(handler));
    SlowApp {
        app: Arc::new(app),
        readiness,
        entered,
        release,
    }
}

#[tokio::test]
async fn probes_report_ready_only_once_listening() {
    let app = App::new(&local_config(), MetricsRegistry::detached());
    assert!(!app.readiness().get());
    assert!(app.local_addr().is_none());

    app.start().await.unwrap();
    let addr = app.local_addr().unwrap();

    let (status, body) = get(addr, "/readyz").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["ready"], true);

    let (status, _) = get(addr, "/healthz").await.unwrap();
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(addr, "/").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], br#"{"message":"Hello World!"}"#);

    app.stop().await.unwrap();
    assert!(!app.readiness().get());
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn stop_lowers_readiness_then_drains_in_flight_requests() {
    let slow = slow_app(&local_config());
    slow.app.start().await.unwrap();
    let addr = slow.app.local_addr().unwrap();

    let request = tokio::spawn(get(addr, "/slow"));
    slow.entered.notified().await;

    let stopping = {
        let app = Arc::clone(&slow.app);
        tokio::spawn(async move { app.stop().await })
    };

    while slow.readiness.get() {
        tokio::task::yield_now().await;
    }
    assert!(!request.is_finished());
    assert!(!stopping.is_finished());

    slow.release.notify_one();

    let (status, _) = request.await.unwrap().unwrap();
    assert_eq!(status, StatusCode::OK);
    stopping.await.unwrap().unwrap();

    assert_eq!(slow.app.lifecycle().state(), LifecycleState::Stopped);
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn drain_past_deadline_reports_stop_failure() {
    let mut config = local_config();
    config.server.shutdown_timeout_secs = 1;

    let slow = slow_app(&config);
    slow.app.start().await.unwrap();
    let addr = slow.app.local_addr().unwrap();

    let request = tokio::spawn(get(addr, "/slow"));
    slow.entered.notified().await;

    let err = tokio::time::timeout(Duration::from_secs(10), slow.app.stop())
        .await
        .expect("stop must give up on its own")
        .unwrap_err();

    match err {
        LifecycleError::StopFailed { failures } => {
            assert_eq!(failures.hooks(), vec!["http-server"]);
            assert!(failures.to_string().contains("timed out"));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(!slow.readiness.get());
    assert!(request.await.unwrap().is_err());
}

#[tokio::test]
async fn bind_failure_fails_start_and_stays_unready() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = local_config();
    config.server.http_addr = occupied.local_addr().unwrap().to_string();

    let app = App::new(&config, MetricsRegistry::detached());
    let err = app.start().await.unwrap_err();

    match err {
        LifecycleError::StartFailed { hook, .. } => assert_eq!(hook, "http-server"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!app.readiness().get());
    assert_eq!(app.lifecycle().state(), LifecycleState::Stopped);
}
