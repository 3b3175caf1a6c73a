//! Integration tests for the HTTP server and the disposition-to-wire mapping
//!
//! # Test Coverage
//!
//! - Registry-rendered failures over a real socket
//! - Rejected WebSocket handshakes: rejection written, then the socket closes
//! - Successful upgrades: `101` with the accept key
//! - Handler timeouts from `AppConfig::handler_timeout_ms`: nothing written,
//!   socket closed
//! - Undecodable requests answered through the error registry
//!
//! # Test Fixtures
//!
//! `TestServer` starts an `HttpServer(AppService)` on a free local port and
//! stops it on drop.

mod common;

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use view_dispatch::app::{AppBuilder, Application, ErrorTarget};
use view_dispatch::config::AppConfig;
use view_dispatch::dispatcher::{immediate, suspended, HandlerResponse};
use view_dispatch::handshake::compute_accept_key;
use view_dispatch::registry::{error_handler, ErrorKey, ErrorHandlerRef};
use view_dispatch::router::RouteDecl;
use view_dispatch::server::{AppService, HttpServer, ServerHandle};

use common::requests::SAMPLE_KEY;

/// Server fixture; stops the server when dropped.
struct TestServer {
    handle: Option<ServerHandle>,
    addr: SocketAddr,
}

impl TestServer {
    fn start(app: Arc<Application>) -> Self {
        common::test_server::setup_may_runtime();
        common::tracing_util::init();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let handle = HttpServer(AppService::new(app)).start(addr).unwrap();
        handle.wait_ready().unwrap();

        Self {
            handle: Some(handle),
            addr,
        }
    }

    fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop();
        }
    }
}

fn tagged(tag: &'static str) -> ErrorHandlerRef {
    error_handler(move |ctx| Ok(HandlerResponse::json(ctx.status, json!({ "tag": tag }))))
}

fn app(config: AppConfig) -> Arc<Application> {
    let mut b = AppBuilder::new().with_config(config);
    b.route(RouteDecl::get("/", immediate(|_req| Ok(HandlerResponse::ok(json!({"ok": true}))))))
        .unwrap()
        .route(RouteDecl::post("/items", immediate(|_req| Ok(HandlerResponse::empty(201)))))
        .unwrap()
        .route(RouteDecl::get(
            "/slow",
            suspended(|_req| {
                may::coroutine::sleep(Duration::from_secs(2));
                Ok(HandlerResponse::ok(json!("late")))
            }),
        ))
        .unwrap()
        .route(RouteDecl::websocket(
            "/ws",
            &["chat"],
            immediate(|_req| Ok(HandlerResponse::empty(200))),
        ))
        .unwrap();
    b.load_errors(
        ErrorTarget::App,
        [
            (ErrorKey::Status(404), tagged("not-found")),
            (ErrorKey::Status(400), tagged("bad-request")),
        ],
    )
    .unwrap();
    b.build()
}

/// Write `req`, then read until the server closes the connection or `wait`
/// passes without data. Returns the text read and whether the server closed.
fn exchange(addr: &SocketAddr, req: &[u8], wait: Duration) -> (String, bool) {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(req).unwrap();
    stream.set_read_timeout(Some(wait)).unwrap();
    let mut buf = Vec::new();
    let closed = loop {
        let mut tmp = [0u8; 1024];
        match stream.read(&mut tmp) {
            Ok(0) => break true,
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                break false
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::ConnectionReset => break true,
            Err(e) => panic!("read error: {e:?}"),
        }
    };
    (String::from_utf8_lossy(&buf).to_string(), closed)
}

fn parse_response(resp: &str) -> (u16, Vec<(String, String)>, Value) {
    let mut parts = resp.splitn(2, "\r\n\r\n");
    let head = parts.next().unwrap_or("");
    let body = parts.next().unwrap_or("");
    let mut status = 0;
    let mut headers = Vec::new();
    for line in head.lines() {
        if line.starts_with("HTTP/1.1") {
            status = line.split_whitespace().nth(1).unwrap_or("0").parse().unwrap();
        } else if let Some((name, val)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), val.trim().to_string()));
        }
    }
    let body = serde_json::from_str(body).unwrap_or(Value::Null);
    (status, headers, body)
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
}

#[test]
fn test_success_over_the_wire() {
    let server = TestServer::start(app(AppConfig::default()));
    let (resp, _) = exchange(
        &server.addr(),
        b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n",
        Duration::from_millis(200),
    );
    let (status, headers, body) = parse_response(&resp);
    assert_eq!(status, 200);
    assert_eq!(header(&headers, "content-type"), Some("application/json"));
    assert_eq!(body, json!({"ok": true}));
}

#[test]
fn test_route_404_uses_registered_handler() {
    let server = TestServer::start(app(AppConfig::default()));
    let (resp, _) = exchange(
        &server.addr(),
        b"GET /nope HTTP/1.1\r\nHost: localhost\r\n\r\n",
        Duration::from_millis(200),
    );
    let (status, _headers, body) = parse_response(&resp);
    assert_eq!(status, 404);
    assert_eq!(body["tag"], "not-found");
}

#[test]
fn test_rejected_handshake_closes_connection() {
    let server = TestServer::start(app(AppConfig::default()));
    let req = format!(
        "GET /ws HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n\
         Sec-WebSocket-Key: {SAMPLE_KEY}\r\nSec-WebSocket-Version: 13\r\n\r\n"
    );
    let (resp, closed) = exchange(&server.addr(), req.as_bytes(), Duration::from_secs(2));
    let (status, headers, body) = parse_response(&resp);
    assert_eq!(status, 400);
    assert_eq!(header(&headers, "connection"), Some("close"));
    assert_eq!(body, Value::Null);
    assert!(closed, "server kept the connection open after a rejected handshake");
}

#[test]
fn test_unsupported_version_is_426_then_closed() {
    let server = TestServer::start(app(AppConfig::default()));
    let req = format!(
        "GET /ws HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Key: {SAMPLE_KEY}\r\nSec-WebSocket-Version: 8\r\n\r\n"
    );
    let (resp, closed) = exchange(&server.addr(), req.as_bytes(), Duration::from_secs(2));
    let (status, headers, _body) = parse_response(&resp);
    assert_eq!(status, 426);
    assert_eq!(header(&headers, "sec-websocket-version"), Some("13"));
    assert!(closed);
}

#[test]
fn test_upgrade_writes_101() {
    let server = TestServer::start(app(AppConfig::default()));
    let req = format!(
        "GET /ws HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Key: {SAMPLE_KEY}\r\nSec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Protocol: chat\r\n\r\n"
    );
    let (resp, _) = exchange(&server.addr(), req.as_bytes(), Duration::from_millis(300));
    let (status, headers, _body) = parse_response(&resp);
    assert_eq!(status, 101);
    assert_eq!(
        header(&headers, "sec-websocket-accept"),
        Some(compute_accept_key(SAMPLE_KEY).as_str())
    );
    assert_eq!(header(&headers, "sec-websocket-protocol"), Some("chat"));
}

#[test]
fn test_handler_timeout_writes_nothing_and_closes() {
    let config = AppConfig {
        handler_timeout_ms: Some(50),
        ..AppConfig::default()
    };
    let server = TestServer::start(app(config));
    let (resp, closed) = exchange(
        &server.addr(),
        b"GET /slow HTTP/1.1\r\nHost: localhost\r\n\r\n",
        Duration::from_secs(1),
    );
    assert!(resp.is_empty(), "abandoned request wrote {resp:?}");
    assert!(closed, "connection stayed open after the handler timed out");
}

#[test]
fn test_undecodable_body_uses_registered_400_handler() {
    let server = TestServer::start(app(AppConfig::default()));
    let mut req = b"POST /items HTTP/1.1\r\nHost: localhost\r\nContent-Length: 2\r\n\r\n".to_vec();
    req.extend_from_slice(&[0xff, 0xfe]);
    let (resp, _) = exchange(&server.addr(), &req, Duration::from_millis(200));
    let (status, _headers, body) = parse_response(&resp);
    assert_eq!(status, 400);
    assert_eq!(body["tag"], "bad-request");
}
