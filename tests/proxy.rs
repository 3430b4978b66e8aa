//! End-to-end tests over real sockets: a server instance on an ephemeral
//! port, a scripted upstream, and raw HTTP/1.1 written by hand.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use grx::config::{BalancerKind, ForwardConfig, ForwardMode, ServerConfig, StaticConfig, Upstream};
use grx::server::{Server, ServerStatus, SupervisorStatus};
use grx::supervisor::Supervisor;

fn forward_config(
    upstream: &str,
    mode: ForwardMode,
    id: &str,
    timeout: Duration,
    max_connections: usize,
) -> ServerConfig {
    ServerConfig::Forward(ForwardConfig {
        name: "test-forward".into(),
        listen: "127.0.0.1:0".into(),
        max_connections,
        request_timeout: timeout,
        id: id.into(),
        forward_mode: mode,
        upstreams: vec![Upstream { address: upstream.into(), weight: 1 }],
        balancer: BalancerKind::Single,
    })
}

async fn start(config: ServerConfig) -> Arc<Server> {
    let server = Arc::new(Server::from_config(config).await.expect("server must bind"));
    tokio::spawn(server.clone().run());
    while server.status() != ServerStatus::Online {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    server
}

/// Send raw bytes and collect the whole response; the server closes the
/// connection after one exchange, so read-to-end terminates.
async fn send(addr: SocketAddr, raw: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream.write_all(raw).await.expect("write request");
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.expect("read response");
    String::from_utf8_lossy(&response).into_owned()
}

/// Read one request (headers plus any `Content-Length` body) off a stream.
async fn read_full_request(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.expect("upstream read");
        assert!(n > 0, "connection closed before a full request arrived");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(at) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break at + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.expect("upstream read");
        assert!(n > 0, "connection closed mid-body");
        buf.extend_from_slice(&chunk[..n]);
    }
    buf
}

/// One-shot upstream: accepts a single connection, captures the request,
/// replies with a canned response.
async fn mock_upstream(response: &'static [u8]) -> (SocketAddr, oneshot::Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind upstream");
    let addr = listener.local_addr().expect("upstream addr");
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("upstream accept");
        let request = read_full_request(&mut stream).await;
        stream.write_all(response).await.expect("upstream write");
        stream.flush().await.ok();
        let _ = tx.send(request);
    });
    (addr, rx)
}

#[tokio::test]
async fn forwards_and_appends_the_forwarded_header() {
    let (upstream_addr, captured) =
        mock_upstream(b"HTTP/1.1 200 OK\r\nx-upstream: yes\r\ncontent-length: 5\r\n\r\nhello").await;
    let server = start(forward_config(
        &upstream_addr.to_string(),
        ForwardMode::Forwarded,
        "proxy-1",
        Duration::from_secs(5),
        4,
    ))
    .await;

    let response = send(
        server.local_addr(),
        b"GET /a?b=1 HTTP/1.1\r\nhost: example.test\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "got: {response}");
    assert!(response.contains("x-upstream: yes"));
    assert!(response.contains("server: grx/"));
    assert!(response.contains("content-length: 5"));
    assert!(response.ends_with("hello"));

    let request = String::from_utf8(captured.await.expect("request captured")).unwrap();
    assert!(request.starts_with("GET /a?b=1 HTTP/1.1\r\n"), "got: {request}");
    assert!(request.contains("host: example.test"));
    assert!(request.contains("forwarded: for=127.0.0.1:"), "got: {request}");
    assert!(request.contains(";by=proxy-1;host=example.test\r\n"), "got: {request}");
}

#[tokio::test]
async fn appends_to_an_existing_x_forwarded_for() {
    let (upstream_addr, captured) =
        mock_upstream(b"HTTP/1.1 204 No Content\r\ncontent-length: 0\r\n\r\n").await;
    let server = start(forward_config(
        &upstream_addr.to_string(),
        ForwardMode::XForwarded,
        "",
        Duration::from_secs(5),
        4,
    ))
    .await;

    let response = send(
        server.local_addr(),
        b"GET / HTTP/1.1\r\nhost: example.test\r\nx-forwarded-for: 10.0.0.7:5555\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 204 No Content\r\n"), "got: {response}");

    let request = String::from_utf8(captured.await.expect("request captured")).unwrap();
    let listen = server.local_addr();
    assert!(
        request.contains(&format!("x-forwarded-for: 10.0.0.7:5555, {listen}\r\n")),
        "got: {request}"
    );
    assert!(request.contains("x-forwarded-host: example.test\r\n"), "got: {request}");
    assert!(!request.contains("\r\nforwarded:"), "got: {request}");
}

#[tokio::test]
async fn round_trips_the_request_body() {
    let (upstream_addr, captured) =
        mock_upstream(b"HTTP/1.1 201 Created\r\ncontent-length: 4\r\n\r\ndone").await;
    let server = start(forward_config(
        &upstream_addr.to_string(),
        ForwardMode::Forwarded,
        "",
        Duration::from_secs(5),
        4,
    ))
    .await;

    let response = send(
        server.local_addr(),
        b"POST /submit HTTP/1.1\r\nhost: h\r\ncontent-length: 4\r\nx-custom: kept\r\n\r\nping",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 201 Created\r\n"), "got: {response}");
    assert!(response.ends_with("done"));

    let request = String::from_utf8(captured.await.expect("request captured")).unwrap();
    assert!(request.starts_with("POST /submit HTTP/1.1\r\n"), "got: {request}");
    assert!(request.contains("x-custom: kept\r\n"));
    assert!(request.contains("content-length: 4\r\n"));
    assert!(request.ends_with("ping"), "got: {request}");
}

#[tokio::test]
async fn unreachable_upstream_is_a_bad_gateway() {
    // Bind then drop to get a port that refuses connections.
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = closed.local_addr().unwrap();
    drop(closed);

    let server = start(forward_config(
        &upstream_addr.to_string(),
        ForwardMode::Forwarded,
        "",
        Duration::from_secs(5),
        4,
    ))
    .await;

    let response = send(server.local_addr(), b"GET / HTTP/1.1\r\nhost: h\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 502 Bad Gateway\r\n"), "got: {response}");
    assert!(response.ends_with("HTTP 502 BAD GATEWAY"));
}

#[tokio::test]
async fn slow_upstream_is_a_request_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("upstream accept");
        let _ = read_full_request(&mut stream).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        let _ = stream.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n").await;
    });

    let server = start(forward_config(
        &upstream_addr.to_string(),
        ForwardMode::Forwarded,
        "",
        Duration::from_millis(250),
        4,
    ))
    .await;

    let response = send(server.local_addr(), b"GET / HTTP/1.1\r\nhost: h\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 408 Request Timeout\r\n"), "got: {response}");
    assert!(response.ends_with("HTTP 408 REQUEST TIMEOUT"));
}

#[tokio::test]
async fn unparsable_requests_get_a_bad_request() {
    let (upstream_addr, _captured) =
        mock_upstream(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n").await;
    let server = start(forward_config(
        &upstream_addr.to_string(),
        ForwardMode::Forwarded,
        "",
        Duration::from_secs(5),
        4,
    ))
    .await;

    let response = send(server.local_addr(), b"garbage\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "got: {response}");
    assert!(response.ends_with("HTTP 400 BAD REQUEST"));
}

#[tokio::test]
async fn pipelines_never_exceed_max_connections() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = listener.local_addr().unwrap();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    {
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    let _ = read_full_request(&mut stream).await;
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    let _ = stream
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok")
                        .await;
                });
            }
        });
    }

    let server = start(forward_config(
        &upstream_addr.to_string(),
        ForwardMode::Forwarded,
        "",
        Duration::from_secs(10),
        2,
    ))
    .await;
    let addr = server.local_addr();

    let clients: Vec<_> = (0..3)
        .map(|_| tokio::spawn(async move { send(addr, b"GET / HTTP/1.1\r\nhost: h\r\n\r\n").await }))
        .collect();
    for client in clients {
        let response = client.await.expect("client task");
        assert!(response.starts_with("HTTP/1.1 200 OK"), "got: {response}");
    }

    assert!(peak.load(Ordering::SeqCst) <= 2, "a third pipeline ran before a slot freed");
    assert_eq!(in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn serves_files_under_the_prefix() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), b"hi").unwrap();

    let server = start(ServerConfig::Static(StaticConfig {
        name: "assets".into(),
        listen: "127.0.0.1:0".into(),
        max_connections: 4,
        path_prefix: dir.path().to_path_buf(),
    }))
    .await;

    let response = send(server.local_addr(), b"GET /index.html HTTP/1.1\r\nhost: h\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "got: {response}");
    assert!(response.contains("content-length: 2\r\n"));
    assert!(response.ends_with("hi"));

    let missing = send(server.local_addr(), b"GET /nope.html HTTP/1.1\r\nhost: h\r\n\r\n").await;
    assert!(missing.starts_with("HTTP/1.1 404 Not Found\r\n"), "got: {missing}");
    assert!(missing.ends_with("HTTP 404 NOT FOUND"));

    let traversal = send(server.local_addr(), b"GET /../secret HTTP/1.1\r\nhost: h\r\n\r\n").await;
    assert!(traversal.starts_with("HTTP/1.1 404 Not Found\r\n"), "got: {traversal}");
}

#[tokio::test]
async fn static_server_requires_an_existing_directory() {
    let config = ServerConfig::Static(StaticConfig {
        name: "assets".into(),
        listen: "127.0.0.1:0".into(),
        max_connections: 4,
        path_prefix: "/definitely/not/a/directory".into(),
    });
    assert!(Server::from_config(config).await.is_err());
}

#[tokio::test]
async fn supervisor_stop_waits_for_offline() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("f.txt"), b"x").unwrap();

    let supervisor = Supervisor::new(vec![ServerConfig::Static(StaticConfig {
        name: "assets".into(),
        listen: "127.0.0.1:0".into(),
        max_connections: 8,
        path_prefix: dir.path().to_path_buf(),
    })])
    .await
    .unwrap();
    assert_eq!(supervisor.status(), SupervisorStatus::Stopped);

    supervisor.run();
    let server = supervisor.servers()[0].clone();
    while server.status() != ServerStatus::Online {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(supervisor.status(), SupervisorStatus::Running);

    let response = send(server.local_addr(), b"GET /f.txt HTTP/1.1\r\nhost: h\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 200 OK"), "got: {response}");

    supervisor.stop().await;
    assert_eq!(supervisor.status(), SupervisorStatus::Stopped);
    assert_eq!(server.status(), ServerStatus::Offline);

    // The listener is gone: new connections are refused.
    assert!(TcpStream::connect(server.local_addr()).await.is_err());
}
