//! End-to-end tests through the accept loop.

mod common;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{read_head, split_response, upstream_listener};
use streamproxy::config::Config;
use streamproxy::http::request::Request;
use streamproxy::http::response::{Response, StatusCode};
use streamproxy::proxy::forwarder::Forwarder;
use streamproxy::proxy::rule::{ProxyRule, Rewrite, RuleSet};
use streamproxy::server::fallback::Fallback;
use streamproxy::server::listener::{ACCEPT_BACKOFF, accept_backoff, serve};
use streamproxy::server::service::ProxyService;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const LIMIT: Duration = Duration::from_secs(5);

async fn start(service: ProxyService) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, Arc::new(service)));
    addr
}

async fn exchange(addr: SocketAddr, raw_request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw_request).await.unwrap();
    let mut response = Vec::new();
    timeout(LIMIT, stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    response
}

fn stream_service(upstream: SocketAddr) -> ProxyService {
    let rule = ProxyRule::new("/stream", &format!("http://{upstream}/?action=stream"))
        .unwrap()
        .with_change_origin(true)
        .with_rewrite(Rewrite::StripPrefix("/stream".to_string()));
    ProxyService::new(RuleSet::new(vec![rule]), Forwarder::default())
}

/// Records the path of every request it answers.
#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<String>>>,
}

impl Fallback for Recorder {
    fn respond(&self, request: &Request) -> Response {
        self.seen.lock().unwrap().push(request.path.clone());
        Response::ok(b"app shell".to_vec())
    }
}

#[tokio::test]
async fn test_unmatched_path_gets_not_found() {
    let addr = start(ProxyService::from_config(&Config::default()).unwrap()).await;

    let raw = exchange(addr, b"GET /other HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;

    let (head, body) = split_response(&raw);
    assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert_eq!(body, b"404 Not Found\n");
}

#[tokio::test]
async fn test_unmatched_path_reaches_fallback_unchanged() {
    let (_listener, upstream) = upstream_listener().await;
    let recorder = Recorder::default();
    let service = stream_service(upstream).with_fallback(recorder.clone());
    let addr = start(service).await;

    let raw = exchange(
        addr,
        b"GET /other?x=1 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;

    let (head, body) = split_response(&raw);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body, b"app shell");
    assert_eq!(*recorder.seen.lock().unwrap(), vec!["/other?x=1".to_string()]);
}

#[tokio::test]
async fn test_fallback_connection_is_kept_alive() {
    let recorder = Recorder::default();
    let service = ProxyService::new(RuleSet::new(Vec::new()), Forwarder::default())
        .with_fallback(recorder.clone());
    let addr = start(service).await;

    let raw = exchange(
        addr,
        b"GET /a HTTP/1.1\r\nHost: localhost\r\n\r\nGET /b HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;

    let text = String::from_utf8(raw).unwrap();
    assert_eq!(text.matches("HTTP/1.1 200 OK\r\n").count(), 2);
    assert_eq!(*recorder.seen.lock().unwrap(), vec!["/a", "/b"]);
}

#[tokio::test]
async fn test_malformed_request_gets_bad_request() {
    let addr = start(ProxyService::from_config(&Config::default()).unwrap()).await;

    let raw = exchange(addr, b"NOT A REQUEST\r\n\r\n").await;

    assert!(raw.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));
}

#[tokio::test]
async fn test_stream_proxied_end_to_end() {
    let (listener, upstream) = upstream_listener().await;
    let upstream_task = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let head = read_head(&mut sock).await;
        sock.write_all(b"HTTP/1.0 200 OK\r\nContent-Type: multipart/x-mixed-replace;boundary=frame\r\n\r\n")
            .await
            .unwrap();
        for i in 0..3 {
            let frame = format!("--frame\r\n\r\nimg{i}\r\n");
            sock.write_all(frame.as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        head
    });

    let addr = start(stream_service(upstream)).await;
    let raw = exchange(
        addr,
        b"GET /stream HTTP/1.1\r\nHost: localhost:5173\r\nConnection: keep-alive\r\n\r\n",
    )
    .await;

    let upstream_head = upstream_task.await.unwrap();
    assert!(upstream_head.starts_with("GET /?action=stream HTTP/1.1\r\n"));
    assert!(upstream_head.contains(&format!("Host: {upstream}\r\n")));
    assert!(!upstream_head.contains("keep-alive"));

    let (head, body) = split_response(&raw);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Connection: close\r\n"));
    assert_eq!(
        body,
        b"--frame\r\n\r\nimg0\r\n--frame\r\n\r\nimg1\r\n--frame\r\n\r\nimg2\r\n"
    );
}

#[tokio::test]
async fn test_unreachable_upstream_through_server_is_bad_gateway() {
    let (listener, upstream) = upstream_listener().await;
    drop(listener);

    let addr = start(stream_service(upstream)).await;
    let raw = exchange(addr, b"GET /stream HTTP/1.1\r\nHost: localhost\r\n\r\n").await;

    let (head, _) = split_response(&raw);
    assert!(head.starts_with(&format!(
        "HTTP/1.1 {} Bad Gateway\r\n",
        StatusCode::BadGateway.as_u16()
    )));
}

#[test]
fn test_accept_errors_are_retried_with_backoff() {
    // EMFILE: process out of file descriptors
    let emfile = std::io::Error::from_raw_os_error(24);
    let aborted = std::io::Error::from(std::io::ErrorKind::ConnectionAborted);
    let reset = std::io::Error::from(std::io::ErrorKind::ConnectionReset);

    assert_eq!(accept_backoff(&emfile), ACCEPT_BACKOFF);
    assert_eq!(accept_backoff(&aborted), Duration::ZERO);
    assert_eq!(accept_backoff(&reset), Duration::ZERO);
}

#[tokio::test]
async fn test_server_keeps_serving_after_dropped_clients() {
    let addr = start(ProxyService::from_config(&Config::default()).unwrap()).await;

    for _ in 0..5 {
        drop(TcpStream::connect(addr).await.unwrap());
    }

    let raw = exchange(addr, b"GET /after HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;
    assert!(raw.starts_with(b"HTTP/1.1 404 Not Found\r\n"));
}
