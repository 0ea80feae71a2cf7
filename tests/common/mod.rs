//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use forward_proxy::net::Listener;
use forward_proxy::{HttpServer, ProxyConfig, Shutdown};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A proxy serving on an ephemeral loopback port.
pub struct RunningProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), std::io::Error>>,
}

/// Config suitable for tests: ephemeral port, no metrics exporter.
pub fn test_config() -> ProxyConfig {
    ProxyConfig {
        server_address: "127.0.0.1:0".to_string(),
        metrics_enabled: false,
        client_read_timeout_secs: 5,
        client_write_timeout_secs: 5,
        shutdown_grace_secs: 2,
        ..ProxyConfig::default()
    }
}

pub async fn spawn_proxy(config: ProxyConfig) -> RunningProxy {
    let listener = Listener::bind(&config.listen_address(), config.max_connections)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    let server = HttpServer::new(&config);
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let handle = tokio::spawn(server.run(listener, server_shutdown));

    RunningProxy { addr, shutdown, handle }
}

/// A port nothing is listening on.
pub async fn unreachable_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// One request as seen by a mock origin.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub head: String,
    pub body: Vec<u8>,
}

impl SeenRequest {
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim().to_string())
        })
    }
}

/// Start a mock origin. Each request is reported on the returned channel and
/// answered with whatever `respond` builds from it; the connection is then closed.
pub async fn start_origin<F>(respond: F) -> (SocketAddr, mpsc::UnboundedReceiver<SeenRequest>)
where
    F: Fn(&SeenRequest) -> String + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let respond = std::sync::Arc::new(respond);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            let respond = respond.clone();
            tokio::spawn(async move {
                let head = read_head(&mut socket).await;
                let length = content_length(&head);
                let mut body = vec![0u8; length];
                socket.read_exact(&mut body).await.unwrap();

                let seen = SeenRequest { head, body };
                let response = respond(&seen);
                let _ = tx.send(seen);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, rx)
}

/// A raw HTTP/1.1 response with a body and `Connection: close`.
pub fn http_response(status: &str, extra_headers: &[(&str, &str)], body: &str) -> String {
    let mut response = format!("HTTP/1.1 {}\r\n", status);
    for (name, value) in extra_headers {
        response.push_str(&format!("{}: {}\r\n", name, value));
    }
    response.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    ));
    response
}

/// Read up to and including the blank line ending an HTTP head, one byte at a
/// time so nothing after it is consumed.
pub async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap();
        assert_ne!(n, 0, "stream closed inside HTTP head: {:?}", String::from_utf8_lossy(&head));
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

pub fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Read a complete response that carries a Content-Length.
pub async fn read_response(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let head = read_head(stream).await;
    let mut body = vec![0u8; content_length(&head)];
    stream.read_exact(&mut body).await.unwrap();
    (head, body)
}

/// Send a CONNECT for `target` and return the proxy's response head.
pub async fn send_connect(stream: &mut TcpStream, target: SocketAddr) -> String {
    let request = format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n\r\n", target);
    stream.write_all(request.as_bytes()).await.unwrap();
    read_head(stream).await
}

/// Await `future`, failing the test if it takes longer than `secs`.
pub async fn within<F: std::future::Future>(secs: u64, future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(secs), future)
        .await
        .expect("timed out")
}
