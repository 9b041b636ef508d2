//! Request metrics recorded by the server.
//!
//! The Prometheus recorder is process-global, so everything here runs in a
//! single test to keep the in-flight gauge free of interference.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;

use harbor_server::handler::empty_response;
use harbor_server::{
    HttpRequest, MatchedRoute, ReadinessFlag, ServerConfig, ServerHandle, SharedHandler,
};
use harbor_telemetry::metrics::{init_metrics, MetricsConfig, IN_FLIGHT_REQUESTS, REQUESTS_TOTAL};

async fn get(addr: SocketAddr, path: &str) -> StatusCode {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .unwrap();
    tokio::spawn(conn);

    let request = Request::builder()
        .uri(path)
        .header(http::header::HOST, "localhost")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = sender.send_request(request).await.unwrap();
    let status = response.status();
    response.into_body().collect().await.unwrap();
    status
}

fn in_flight(exposition: &str) -> f64 {
    exposition
        .lines()
        .find(|line| line.starts_with(IN_FLIGHT_REQUESTS))
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0.0)
}

fn counted(exposition: &str, labels: &[&str]) -> bool {
    exposition
        .lines()
        .filter(|line| line.starts_with(REQUESTS_TOTAL))
        .any(|line| labels.iter().all(|label| line.contains(label)))
}

#[tokio::test]
async fn server_meters_every_request() {
    let registry = init_metrics(&MetricsConfig::default()).unwrap();

    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let handler: SharedHandler = {
        let entered = Arc::clone(&entered);
        let release = Arc::clone(&release);
        Arc::new(move |req: HttpRequest| {
            let entered = Arc::clone(&entered);
            let release = Arc::clone(&release);
            async move {
                if req.uri().path() == "/held" {
                    entered.notify_one();
                    release.notified().await;
                }
                let mut response = empty_response(StatusCode::OK);
                if req.uri().path() == "/labelled" {
                    response.extensions_mut().insert(MatchedRoute("/labelled"));
                }
                response
            }
        })
    };

    let config = ServerConfig::builder()
        .http_addr("127.0.0.1:0")
        .request_timeout(Duration::from_millis(500))
        .build();
    let server = ServerHandle::new(config, handler, ReadinessFlag::new());
    let addr = server.start().await.unwrap();

    // A request is in flight for as long as the handler runs
    assert!(in_flight(&registry.render()) < 0.5);
    let held = tokio::spawn(get(addr, "/held"));
    entered.notified().await;
    assert!(in_flight(&registry.render()) >= 1.0);
    release.notify_one();
    assert_eq!(held.await.unwrap(), StatusCode::OK);
    assert!(in_flight(&registry.render()) < 0.5);

    // Route label from the handler, "unmatched" otherwise
    assert_eq!(get(addr, "/labelled").await, StatusCode::OK);
    let exposition = registry.render();
    assert!(counted(&exposition, &["path=\"/labelled\"", "status=\"200\""]));
    assert!(counted(&exposition, &["path=\"unmatched\"", "status=\"200\""]));
    assert!(!exposition.contains("path=\"/held\""));

    // Responses the server produces itself are counted too
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 10\r\n\r\nabc")
        .await
        .unwrap();
    let mut head = vec![0; 64];
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut head))
        .await
        .unwrap()
        .unwrap();
    assert!(String::from_utf8_lossy(&head[..read]).starts_with("HTTP/1.1 408"));
    drop(stream);
    assert!(counted(
        &registry.render(),
        &["method=\"POST\"", "path=\"unmatched\"", "status=\"408\""]
    ));

    server.stop(Duration::from_secs(2)).await.unwrap();
}
